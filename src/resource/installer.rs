//! Installer resources: strategy definitions Tools reference by name.

use super::commands::CommandSet;
use super::{ResourceId, ResourceKind, StrategyKind};
use crate::core::TomeiError;
use serde::{Deserialize, Serialize};

/// A named installation strategy.
///
/// - `download`: the built-in fetch/verify/extract pipeline, usually paired
///   with a package resolver registered under this installer's name
/// - `delegation`: drives a foreign toolchain (exactly one of `runtimeRef`
///   or `toolRef`) with user-declared commands
/// - `commands`: standalone user-declared commands, no references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerSpec {
    pub strategy: StrategyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
}

impl InstallerSpec {
    pub fn validate(&self, name: &str) -> Result<(), TomeiError> {
        let resource = format!("Installer/{name}");
        match self.strategy {
            StrategyKind::Download => {
                if self.runtime_ref.is_some() || self.tool_ref.is_some() || self.commands.is_some()
                {
                    return Err(TomeiError::Schema {
                        resource,
                        field: "strategy".to_string(),
                        reason: "download installers carry no refs or commands".to_string(),
                    });
                }
            }
            StrategyKind::Delegation => {
                match (&self.runtime_ref, &self.tool_ref) {
                    (Some(_), Some(_)) => {
                        return Err(TomeiError::Schema {
                            resource,
                            field: "runtimeRef".to_string(),
                            reason: "delegation takes runtimeRef or toolRef, not both".to_string(),
                        });
                    }
                    (None, None) => {
                        return Err(TomeiError::Schema {
                            resource,
                            field: "runtimeRef".to_string(),
                            reason: "delegation requires exactly one of runtimeRef or toolRef"
                                .to_string(),
                        });
                    }
                    _ => {}
                }
                self.require_install_command(&resource)?;
            }
            StrategyKind::Commands => {
                if self.runtime_ref.is_some() || self.tool_ref.is_some() {
                    return Err(TomeiError::Schema {
                        resource,
                        field: "strategy".to_string(),
                        reason: "commands installers carry no refs".to_string(),
                    });
                }
                self.require_install_command(&resource)?;
            }
        }
        Ok(())
    }

    fn require_install_command(&self, resource: &str) -> Result<(), TomeiError> {
        let has_install = self.commands.as_ref().is_some_and(|c| c.install.is_some());
        if has_install {
            Ok(())
        } else {
            Err(TomeiError::Schema {
                resource: resource.to_string(),
                field: "commands.install".to_string(),
                reason: "an install command is required".to_string(),
            })
        }
    }

    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = Vec::new();
        if let Some(runtime) = &self.runtime_ref {
            deps.push(ResourceId::new(ResourceKind::Runtime, runtime));
        }
        if let Some(tool) = &self.tool_ref {
            deps.push(ResourceId::new(ResourceKind::Tool, tool));
        }
        deps
    }
}
