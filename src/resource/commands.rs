//! User-declared command sets for the delegation and commands strategies.

use serde::{Deserialize, Serialize};

/// Shell-free commands a resource declares for its lifecycle operations.
///
/// Each command is a single line, split into argv without a shell and with
/// `{{.Package}}`, `{{.Version}}` and `{{.BinPath}}` substituted before the
/// split (see `strategy::command`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<String>,
    /// Idempotency probe: zero exit means "already present".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Resolves an alias or `latest` to a concrete version on stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_version: Option<String>,
}

impl CommandSet {
    pub fn is_empty(&self) -> bool {
        self.install.is_none()
            && self.remove.is_none()
            && self.check.is_none()
            && self.update.is_none()
            && self.resolve_version.is_none()
    }
}
