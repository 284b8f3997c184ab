//! Application configuration.
//!
//! An optional `config.toml` in the config root supplies defaults the CLI
//! flags can override. Precedence is flags > config file > built-in
//! defaults; the library itself never reads configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Overrides the data root (`~/.local/share/tomei`).
    pub data_dir: Option<String>,
    /// Overrides the tool symlink directory (`~/.local/bin`).
    pub bin_dir: Option<String>,
    /// Default worker pool size.
    pub parallel: Option<usize>,
    /// Manifest directory applied when none is given on the command line.
    pub manifests: Option<String>,
}

impl Config {
    /// Loads `config.toml` from the config root; a missing file is the
    /// default configuration.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("config.toml");
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        toml::from_str(&content).with_context(|| format!("invalid config: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn file_values_parse() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "parallel = 8\nmanifests = \"~/.config/tomei/manifests\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.parallel, Some(8));
        assert!(config.manifests.unwrap().ends_with("manifests"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "paralell = 8\n").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
