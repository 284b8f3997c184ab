//! Well-known filesystem locations and tilde expansion.
//!
//! Layout:
//! - config root: `~/.config/tomei/` (manifests, `config.toml`)
//! - data root: `~/.local/share/tomei/` (`state.json*`, `tools/`, `runtimes/`)
//! - user bin: `~/.local/bin/` (tool symlinks)

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

/// Application directory name under the XDG roots.
pub const APP_DIR: &str = "tomei";

/// Default config root, `~/.config/tomei`.
pub fn default_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir().context("could not determine config directory")?.join(APP_DIR))
}

/// Default data root, `~/.local/share/tomei`.
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir().context("could not determine data directory")?.join(APP_DIR))
}

/// Default symlink directory for tool binaries, `~/.local/bin`.
pub fn default_bin_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir().context("could not determine home directory")?.join(".local/bin"))
}

/// Expands a leading tilde in a user-authored path.
pub fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(path);
    if expanded.is_empty() {
        return Err(anyhow!("empty path"));
    }
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Versioned install directory for a resource,
/// `<dataDir>/{tools|runtimes}/<name>/<version>/`.
pub fn install_dir(data_dir: &Path, section: &str, name: &str, version: &str) -> PathBuf {
    data_dir.join(section).join(name).join(version)
}
