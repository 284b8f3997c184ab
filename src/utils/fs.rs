//! Filesystem helpers shared across the store and the install strategies.
//!
//! Everything here is synchronous; async callers go through
//! `tokio::task::spawn_blocking` at the call site when the operation may be
//! slow (large extractions, recursive removals).

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Creates a directory and all parents, tolerating pre-existing directories.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

/// Atomically writes bytes using a write-then-rename strategy.
///
/// Content goes to `<path>.tmp`, is synced, then renamed over the target.
/// Readers never observe a partially written file; an interrupted write
/// leaves the previous content intact.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("failed to write temp file: {}", temp_path.display()))?;
        file.sync_all().context("failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))
}

/// Creates or replaces a symlink atomically.
///
/// The link is first created under a temporary name in the same directory,
/// then renamed over the final name. `rename` replaces existing entries, so
/// concurrent readers always see either the old or the new target.
#[cfg(unix)]
pub fn atomic_symlink(target: &Path, link: &Path) -> Result<()> {
    use std::os::unix::fs::symlink;

    if let Some(parent) = link.parent() {
        ensure_dir(parent)?;
    }

    let temp_link = link.with_extension("tmp-link");
    // A stale temp link from a crashed run would make symlink() fail.
    let _ = fs::remove_file(&temp_link);
    symlink(target, &temp_link)
        .with_context(|| format!("failed to create symlink at {}", temp_link.display()))?;
    fs::rename(&temp_link, link)
        .with_context(|| format!("failed to move symlink into place: {}", link.display()))
}

#[cfg(not(unix))]
pub fn atomic_symlink(_target: &Path, _link: &Path) -> Result<()> {
    anyhow::bail!("symlink installation is only supported on unix platforms")
}

/// Sets the executable bits on a file (no-op outside unix).
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to stat: {}", path.display()))?;
        let mut perms = metadata.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set exec bit on: {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Removes a directory tree, tolerating its absence.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove: {}", path.display())),
    }
}

/// Removes a file or symlink, tolerating its absence.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/state.json");

        atomic_write(&path, b"{}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_symlink_replaces_existing_link() {
        let dir = TempDir::new().unwrap();
        let target_a = dir.path().join("a");
        let target_b = dir.path().join("b");
        fs::write(&target_a, "a").unwrap();
        fs::write(&target_b, "b").unwrap();
        let link = dir.path().join("bin/tool");

        atomic_symlink(&target_a, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target_a);

        atomic_symlink(&target_b, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target_b);
    }

    #[cfg(unix)]
    #[test]
    fn set_executable_adds_exec_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin");
        fs::write(&path, "#!/bin/sh\n").unwrap();

        set_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn removals_tolerate_absence() {
        let dir = TempDir::new().unwrap();
        remove_dir_all_if_exists(&dir.path().join("missing")).unwrap();
        remove_file_if_exists(&dir.path().join("missing.txt")).unwrap();
    }
}
