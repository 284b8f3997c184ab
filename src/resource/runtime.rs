//! Runtime resources: language toolchains installed under the data root.

use super::commands::CommandSet;
use super::source::Source;
use super::{ResourceId, StrategyKind};
use crate::core::TomeiError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A language runtime installation (e.g. a downloaded Go toolchain).
///
/// Runtimes install via the `download` strategy (fetch, verify, extract,
/// symlink into their own bin dir) or the `delegation` strategy (foreign
/// tooling such as `rustup`, driven by user-declared commands).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeSpec {
    pub version: String,
    pub strategy: StrategyKind,
    /// Download descriptor; required for the download strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Binary names exposed from the installed tree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    /// Destination directory for exposed binaries, e.g. `~/go/bin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<String>,
    /// Environment variables published to resources delegating to this runtime.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// When true, upgrading this runtime taints every Tool that references it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub taint_on_upgrade: bool,
}

impl RuntimeSpec {
    pub fn validate(&self, name: &str) -> Result<(), TomeiError> {
        let resource = format!("Runtime/{name}");
        match self.strategy {
            StrategyKind::Download => {
                let source = self.source.as_ref().ok_or_else(|| TomeiError::Schema {
                    resource: resource.clone(),
                    field: "source".to_string(),
                    reason: "download strategy requires a source descriptor".to_string(),
                })?;
                source.validate(&resource)?;
                if self.bin_dir.is_none() {
                    return Err(TomeiError::Schema {
                        resource,
                        field: "binDir".to_string(),
                        reason: "download strategy requires a bin directory".to_string(),
                    });
                }
            }
            StrategyKind::Delegation => {
                let commands = self.commands.as_ref().ok_or_else(|| TomeiError::Schema {
                    resource: resource.clone(),
                    field: "commands".to_string(),
                    reason: "delegation strategy requires commands".to_string(),
                })?;
                if commands.install.is_none() {
                    return Err(TomeiError::Schema {
                        resource,
                        field: "commands.install".to_string(),
                        reason: "delegation strategy requires an install command".to_string(),
                    });
                }
            }
            StrategyKind::Commands => {
                return Err(TomeiError::Schema {
                    resource,
                    field: "strategy".to_string(),
                    reason: "runtimes support the download or delegation strategy".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Runtimes sit at the bottom of the graph: no outgoing edges.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        Vec::new()
    }
}
