//! Advisory file lock serializing applies between processes.
//!
//! The lock file (`state.lock`) sits next to the state file and holds the
//! owner's PID as text so a blocked process can say who is in the way.
//! Locking is advisory and exclusive via OS file locks (`fs4`); the lock is
//! released when the guard drops. Acquisition is non-blocking by default —
//! callers opt into a bounded retry window, so tests never hang on a held
//! lock.

use crate::core::TomeiError;
use crate::utils::fs::ensure_dir;
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Exclusive process-wide lock over the state files. Held for the whole
/// apply; dropped (and unlocked) on every exit path.
#[derive(Debug)]
pub struct StateLock {
    file: Arc<File>,
    path: PathBuf,
}

impl StateLock {
    /// Acquires the lock, retrying until `timeout` elapses. `None` means a
    /// single non-blocking attempt.
    pub async fn acquire(
        data_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<Self, TomeiError> {
        let path = data_dir.join("state.lock");
        ensure_dir(data_dir).map_err(|e| TomeiError::StateIo {
            path: data_dir.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TomeiError::StateIo { path: path.clone(), source: e })?;
        let file = Arc::new(file);

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // File locks block the thread, so probe off the runtime.
            let probe = Arc::clone(&file);
            let acquired = tokio::task::spawn_blocking(move || probe.try_lock_exclusive())
                .await
                .map_err(|e| TomeiError::StateIo {
                    path: path.clone(),
                    source: std::io::Error::other(e.to_string()),
                })?
                .map_err(|e| TomeiError::StateIo { path: path.clone(), source: e })?;

            if acquired {
                let lock = Self { file, path };
                lock.write_holder()?;
                debug!(path = %lock.path.display(), "state lock acquired");
                return Ok(lock);
            }

            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                _ => {
                    return Err(TomeiError::StateLocked {
                        holder: read_holder(&path),
                        path,
                    });
                }
            }
        }
    }

    fn write_holder(&self) -> Result<(), TomeiError> {
        let io_err = |e: std::io::Error| TomeiError::StateIo { path: self.path.clone(), source: e };
        let mut file = &*self.file;
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %e, "failed to unlock state lock");
        }
    }
}

/// Best-effort read of the holder PID from the lock file.
fn read_holder(path: &Path) -> Option<u32> {
    let mut content = String::new();
    File::open(path).ok()?.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}
