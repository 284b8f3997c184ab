//! InstallerRepository resources: package sources registered into an
//! external installer (e.g. "add this helm repo").

use super::commands::CommandSet;
use super::{ResourceId, ResourceKind};
use crate::core::TomeiError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerRepositorySpec {
    pub installer_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    /// install / check / remove commands run against the external installer.
    pub commands: CommandSet,
}

impl InstallerRepositorySpec {
    pub fn validate(&self, name: &str) -> Result<(), TomeiError> {
        let resource = format!("InstallerRepository/{name}");
        if self.installer_ref.is_empty() {
            return Err(TomeiError::Schema {
                resource,
                field: "installerRef".to_string(),
                reason: "installerRef is required".to_string(),
            });
        }
        if self.commands.install.is_none() {
            return Err(TomeiError::Schema {
                resource,
                field: "commands.install".to_string(),
                reason: "an install command is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = vec![ResourceId::new(ResourceKind::Installer, &self.installer_ref)];
        if let Some(tool) = &self.tool_ref {
            deps.push(ResourceId::new(ResourceKind::Tool, tool));
        }
        deps
    }
}
