//! Shared test fixtures: sandboxed directories, manifest helpers, archive
//! builders, and a minimal local HTTP server for download scenarios.

#![allow(dead_code)]

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tomei::resource::{StrategyKind, VersionKind};
use tomei::state::{CommonState, RuntimeState, TaintReason, ToolState};

/// An isolated filesystem sandbox for one test.
pub struct TestEnv {
    _tmp: TempDir,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create test sandbox");
        let config_dir = tmp.path().join("config");
        let data_dir = tmp.path().join("data");
        let bin_dir = tmp.path().join("bin");
        for dir in [&config_dir, &data_dir, &bin_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self { _tmp: tmp, config_dir, data_dir, bin_dir }
    }

    pub fn write_manifest(&self, name: &str, content: &str) -> PathBuf {
        let path = self.config_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

/// A minimal common block for hand-built state entries.
pub fn common_state(name: &str, version: &str, digest: &str) -> CommonState {
    CommonState {
        name: name.to_string(),
        strategy: StrategyKind::Download,
        version: version.to_string(),
        resolved_version: None,
        version_kind: VersionKind::classify(version),
        digest: digest.to_string(),
        install_path: None,
        bin_paths: Vec::new(),
        taint_reason: TaintReason::None,
        installed_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn runtime_state(name: &str, version: &str, digest: &str) -> RuntimeState {
    RuntimeState {
        common: common_state(name, version, digest),
        env: BTreeMap::new(),
        bin_dir: None,
        remove_command: None,
        taint_on_upgrade: false,
    }
}

pub fn tool_state(name: &str, version: &str, digest: &str) -> ToolState {
    ToolState {
        common: common_state(name, version, digest),
        installer_ref: "download".to_string(),
        runtime_ref: None,
        repository_ref: None,
        package: None,
        remove_command: None,
    }
}

/// Builds a gzip-compressed tarball in memory.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// A tiny HTTP/1.1 file server bound to a random localhost port.
///
/// Serves a fixed path → bytes map with correct Content-Length; unknown
/// paths get a 404. Connections close after one response, which is all
/// reqwest needs here.
pub struct FixtureServer {
    pub base_url: String,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl FixtureServer {
    pub async fn start(files: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture server");
        let addr = listener.local_addr().unwrap();
        let files = Arc::new(files);
        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown_rx.changed() => break,
                };
                let Ok((stream, _)) = accepted else { break };
                let files = Arc::clone(&files);
                tokio::spawn(async move {
                    let _ = serve_one(stream, &files).await;
                });
            }
        });

        Self { base_url: format!("http://{addr}"), shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn serve_one(
    mut stream: tokio::net::TcpStream,
    files: &HashMap<String, Vec<u8>>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    // Read until the end of the request headers.
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request_line = String::from_utf8_lossy(&buffer);
    let path = request_line
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let response = match files.get(&path) {
        Some(body) => {
            let mut response = Vec::new();
            write!(
                response,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            response.extend_from_slice(body);
            response
        }
        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_vec(),
    };
    stream.write_all(&response).await?;
    stream.shutdown().await
}
