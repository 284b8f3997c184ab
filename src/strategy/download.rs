//! Download strategy: fetch → checksum → extract → place → symlink.
//!
//! Artifacts stream to a per-apply scratch directory, are verified against
//! the declared checksum (inline literal or checksums-file URL), extracted
//! into a versioned directory under the data root, and exposed through
//! atomic symlinks in the target bin directory. Upgrades install the new
//! version first and only then delete the old one, so a failed upgrade
//! leaves the previous install untouched.

use super::archive;
use crate::core::TomeiError;
use crate::engine::cancel::CancelToken;
use crate::engine::events::{Event, EventSink};
use crate::resource::{Checksum, ResourceId, Source};
use crate::utils::fs::{atomic_symlink, remove_dir_all_if_exists, remove_file_if_exists, set_executable};
use crate::utils::paths::install_dir;
use futures::StreamExt;
use sha2::{Digest, Sha256, Sha512};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Environment variables consulted for a bearer credential, in order.
const TOKEN_VARS: &[&str] = &["TOMEI_TOKEN", "GH_TOKEN"];

/// One download-strategy installation.
pub struct DownloadRequest<'a> {
    pub id: &'a ResourceId,
    /// Resolved descriptor (inline from the manifest or from a resolver).
    pub source: &'a Source,
    /// Concrete version; names the versioned install directory.
    pub version: &'a str,
    /// `tools` or `runtimes` under the data root.
    pub section: &'a str,
    /// Binary names to place and link.
    pub binaries: &'a [String],
    /// Where the symlinks land (`~/.local/bin` or the runtime's bin dir).
    pub link_dir: &'a Path,
}

/// What the pipeline produced, recorded into state.
#[derive(Debug)]
pub struct Installed {
    pub install_path: PathBuf,
    /// Symlink paths, one per requested binary.
    pub bin_paths: Vec<PathBuf>,
}

/// Runs the full pipeline for one resource.
pub async fn install(
    client: &reqwest::Client,
    data_dir: &Path,
    scratch: &Path,
    req: DownloadRequest<'_>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<Installed, TomeiError> {
    let filename = req.source.filename();
    let artifact = scratch.join(format!("{}-{}", req.id.name, filename));

    fetch(client, &req.source.url, &artifact, req.id, sink, cancel).await?;
    verify(client, req.source, &artifact).await?;

    let dest = install_dir(data_dir, req.section, &req.id.name, req.version);
    // A partial tree from a crashed run must not mix with this extract.
    remove_dir_all_if_exists(&dest)
        .map_err(|e| TomeiError::ExtractFailed { archive: filename.to_string(), reason: e.to_string() })?;

    let kind = req.source.archive_kind();
    let raw_name = req.binaries.first().cloned().unwrap_or_else(|| req.id.name.clone());
    {
        let artifact = artifact.clone();
        let dest = dest.clone();
        tokio::task::spawn_blocking(move || archive::extract(&artifact, kind, &dest, &raw_name))
            .await
            .map_err(|e| TomeiError::ExtractFailed {
                archive: filename.to_string(),
                reason: e.to_string(),
            })??;
    }

    let bin_paths = place(&dest, req.binaries, req.link_dir, req.id)?;
    let _ = remove_file_if_exists(&artifact);

    info!(resource = %req.id, version = req.version, "installed");
    Ok(Installed { install_path: dest, bin_paths })
}

/// Deletes the symlinks and the whole per-name directory of an entry.
pub fn remove_installed(
    data_dir: &Path,
    section: &str,
    name: &str,
    bin_paths: &[PathBuf],
) -> Result<(), TomeiError> {
    let io_err = |path: &Path, e: anyhow::Error| TomeiError::StateIo {
        path: path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    };
    for link in bin_paths {
        remove_file_if_exists(link).map_err(|e| io_err(link, e))?;
    }
    let name_dir = data_dir.join(section).join(name);
    remove_dir_all_if_exists(&name_dir).map_err(|e| io_err(&name_dir, e))?;
    Ok(())
}

/// Deletes one superseded version directory after a successful upgrade.
pub fn remove_version_dir(install_path: &Path) -> Result<(), TomeiError> {
    remove_dir_all_if_exists(install_path).map_err(|e| TomeiError::StateIo {
        path: install_path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    })
}

/// Streams a URL to a file, emitting progress events.
async fn fetch(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    id: &ResourceId,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<(), TomeiError> {
    if cancel.is_cancelled() {
        return Err(TomeiError::Cancelled);
    }
    debug!(resource = %id, url, "fetching");

    let mut request = client.get(url);
    if let Some(token) = bearer_token() {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| TomeiError::Network {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(TomeiError::HttpStatus { url: url.to_string(), status: status.as_u16() });
    }

    let total = response.content_length();
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(dest).await.map_err(|e| TomeiError::StateIo {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut downloaded: u64 = 0;
    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            () = cancel.cancelled() => {
                drop(file);
                let _ = remove_file_if_exists(dest);
                return Err(TomeiError::Cancelled);
            }
        };
        match chunk {
            Some(Ok(bytes)) => {
                file.write_all(&bytes).await.map_err(|e| TomeiError::StateIo {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
                downloaded += bytes.len() as u64;
                sink.emit(Event::Progress { id: id.clone(), bytes: downloaded, total });
            }
            Some(Err(e)) => {
                drop(file);
                let _ = remove_file_if_exists(dest);
                return Err(TomeiError::Network { url: url.to_string(), reason: e.to_string() });
            }
            None => break,
        }
    }

    file.flush().await.map_err(|e| TomeiError::StateIo {
        path: dest.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn bearer_token() -> Option<String> {
    TOKEN_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|token| !token.is_empty())
}

/// Verifies the artifact against the source's checksum declaration.
/// A mismatch is fatal and cleans the temp file.
async fn verify(
    client: &reqwest::Client,
    source: &Source,
    artifact: &Path,
) -> Result<(), TomeiError> {
    let Some(checksum) = &source.checksum else {
        return Ok(());
    };

    let (expected, algo) = match checksum.parse() {
        Checksum::Sha256(hex) => (hex.to_string(), HashAlgo::Sha256),
        Checksum::Sha512(hex) => (hex.to_string(), HashAlgo::Sha512),
        Checksum::Url(url) => {
            let body = fetch_text(client, url).await?;
            let hex = find_checksum_line(&body, source.filename()).ok_or_else(|| {
                TomeiError::ChecksumMismatch {
                    url: source.url.clone(),
                    expected: format!("entry for {} in {url}", source.filename()),
                    actual: "no matching line".to_string(),
                }
            })?;
            let algo = if hex.len() == 128 { HashAlgo::Sha512 } else { HashAlgo::Sha256 };
            (hex, algo)
        }
    };

    let actual = hash_file(artifact, algo).await?;
    if actual.eq_ignore_ascii_case(&expected) {
        Ok(())
    } else {
        let _ = remove_file_if_exists(artifact);
        Err(TomeiError::ChecksumMismatch {
            url: source.url.clone(),
            expected: format!("{}:{expected}", algo.name()),
            actual: format!("{}:{actual}", algo.name()),
        })
    }
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, TomeiError> {
    let response = client.get(url).send().await.map_err(|e| TomeiError::Network {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(TomeiError::HttpStatus { url: url.to_string(), status: status.as_u16() });
    }
    response.text().await.map_err(|e| TomeiError::Network {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Finds the `<hex>  <filename>` line for an artifact in a checksums file.
/// Tolerates the `*filename` binary-mode marker.
fn find_checksum_line(body: &str, filename: &str) -> Option<String> {
    for line in body.lines() {
        let mut fields = line.split_whitespace();
        let (Some(hex), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let name = name.trim_start_matches('*').trim_start_matches("./");
        if name == filename && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(hex.to_lowercase());
        }
    }
    None
}

#[derive(Clone, Copy)]
enum HashAlgo {
    Sha256,
    Sha512,
}

impl HashAlgo {
    fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

async fn hash_file(path: &Path, algo: HashAlgo) -> Result<String, TomeiError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let content = std::fs::read(&path)
            .map_err(|e| TomeiError::StateIo { path: path.clone(), source: e })?;
        let hex = match algo {
            HashAlgo::Sha256 => hex::encode(Sha256::digest(&content)),
            HashAlgo::Sha512 => hex::encode(Sha512::digest(&content)),
        };
        Ok(hex)
    })
    .await
    .map_err(|e| TomeiError::StateIo {
        path: PathBuf::new(),
        source: std::io::Error::other(e.to_string()),
    })?
}

/// Locates each requested binary in the installed tree, marks it
/// executable, and links it from the bin directory.
fn place(
    install_path: &Path,
    binaries: &[String],
    link_dir: &Path,
    id: &ResourceId,
) -> Result<Vec<PathBuf>, TomeiError> {
    let mut bin_paths = Vec::with_capacity(binaries.len());
    for name in binaries {
        let target = locate_binary(install_path, name).ok_or_else(|| {
            TomeiError::BinaryNotFound { resource: id.qualified(), name: name.clone() }
        })?;
        set_executable(&target).map_err(|e| TomeiError::StateIo {
            path: target.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let link = link_dir.join(name);
        atomic_symlink(&target, &link).map_err(|e| TomeiError::StateIo {
            path: link.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        bin_paths.push(link);
    }
    Ok(bin_paths)
}

/// Finds a binary by name: conventional locations first, then a bounded
/// walk of the extracted tree.
fn locate_binary(install_path: &Path, name: &str) -> Option<PathBuf> {
    for candidate in [
        install_path.join(name),
        install_path.join("bin").join(name),
    ] {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    WalkDir::new(install_path)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == std::ffi::OsStr::new(name))
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_line_matching() {
        let body = "\
0123abcd  gh_linux_amd64.tar.gz
deadbeef *gh_linux_arm64.tar.gz
ffff0000  ./gh_darwin_arm64.tar.gz
";
        assert_eq!(find_checksum_line(body, "gh_linux_arm64.tar.gz").as_deref(), Some("deadbeef"));
        assert_eq!(find_checksum_line(body, "gh_darwin_arm64.tar.gz").as_deref(), Some("ffff0000"));
        assert_eq!(find_checksum_line(body, "missing.tar.gz"), None);
    }

    #[tokio::test]
    async fn hash_file_sha256_matches_known_vector() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"abc").unwrap();

        let hex = hash_file(&path, HashAlgo::Sha256).await.unwrap();
        assert_eq!(hex, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[cfg(unix)]
    #[test]
    fn locate_binary_prefers_conventional_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/go"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/tool")).unwrap();
        std::fs::write(dir.path().join("pkg/tool/go"), b"decoy").unwrap();

        assert_eq!(locate_binary(dir.path(), "go").unwrap(), dir.path().join("bin/go"));
    }

    #[cfg(unix)]
    #[test]
    fn locate_binary_falls_back_to_a_walk() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("go/bin")).unwrap();
        std::fs::write(dir.path().join("go/bin/gofmt"), b"x").unwrap();

        assert_eq!(
            locate_binary(dir.path(), "gofmt").unwrap(),
            dir.path().join("go/bin/gofmt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn place_links_into_bin_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let install = dir.path().join("tools/gh/2.86.0");
        std::fs::create_dir_all(install.join("bin")).unwrap();
        std::fs::write(install.join("bin/gh"), b"x").unwrap();
        let link_dir = dir.path().join("bin");

        let id = ResourceId::new(crate::resource::ResourceKind::Tool, "gh");
        let bin_paths = place(&install, &["gh".to_string()], &link_dir, &id).unwrap();

        assert_eq!(bin_paths, vec![link_dir.join("gh")]);
        assert_eq!(std::fs::read_link(link_dir.join("gh")).unwrap(), install.join("bin/gh"));
    }

    #[test]
    fn missing_binary_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let id = ResourceId::new(crate::resource::ResourceKind::Tool, "gh");
        let err = place(dir.path(), &["gh".to_string()], &dir.path().join("bin"), &id)
            .unwrap_err();
        assert_eq!(err.code(), "E305");
    }
}
