//! Archive extraction for downloaded artifacts.
//!
//! Supports the enumerated set: `tar.gz`, `tar.xz`, `zip`, and `raw` (a bare
//! binary written with the exec bit set). Extraction always lands inside the
//! destination directory; entries that would escape it are rejected.

use crate::core::TomeiError;
use crate::resource::ArchiveKind;
use crate::utils::fs::{ensure_dir, set_executable};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Extracts `archive` into `dest`. For `raw`, the stream is written to
/// `dest/<raw_name>` and marked executable.
pub fn extract(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    raw_name: &str,
) -> Result<(), TomeiError> {
    ensure_dir(dest).map_err(|e| extract_err(archive, e.to_string()))?;
    debug!(archive = %archive.display(), kind = %kind, dest = %dest.display(), "extracting");

    match kind {
        ArchiveKind::TarGz => {
            let file = open(archive)?;
            untar(flate2::read::GzDecoder::new(file), archive, dest)
        }
        ArchiveKind::TarXz => {
            let file = open(archive)?;
            untar(xz2::read::XzDecoder::new(file), archive, dest)
        }
        ArchiveKind::Zip => unzip(archive, dest),
        ArchiveKind::Raw => {
            let target = dest.join(raw_name);
            std::fs::copy(archive, &target).map_err(|e| extract_err(archive, e.to_string()))?;
            set_executable(&target).map_err(|e| extract_err(archive, e.to_string()))
        }
    }
}

fn open(archive: &Path) -> Result<File, TomeiError> {
    File::open(archive).map_err(|e| extract_err(archive, e.to_string()))
}

fn untar<R: Read>(reader: R, archive: &Path, dest: &Path) -> Result<(), TomeiError> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    // `unpack` refuses entries that escape the destination.
    tar.unpack(dest).map_err(|e| extract_err(archive, e.to_string()))
}

fn unzip(archive: &Path, dest: &Path) -> Result<(), TomeiError> {
    let file = open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| extract_err(archive, e.to_string()))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| extract_err(archive, e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(extract_err(archive, format!("entry {:?} escapes the destination", entry.name())));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            ensure_dir(&target).map_err(|e| extract_err(archive, e.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            ensure_dir(parent).map_err(|e| extract_err(archive, e.to_string()))?;
        }
        let mut out =
            File::create(&target).map_err(|e| extract_err(archive, e.to_string()))?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_err(archive, e.to_string()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, Permissions::from_mode(mode))
                .map_err(|e| extract_err(archive, e.to_string()))?;
        }
    }
    Ok(())
}

fn extract_err(archive: &Path, reason: String) -> TomeiError {
    TomeiError::ExtractFailed { archive: archive.display().to_string(), reason }
}
