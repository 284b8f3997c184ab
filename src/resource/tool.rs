//! Tool resources: individual installable artifacts.

use super::commands::CommandSet;
use super::source::Source;
use super::{DOWNLOAD_INSTALLER, ResourceId, ResourceKind};
use crate::core::TomeiError;
use serde::{Deserialize, Serialize};

/// An installable artifact, delivered either by the built-in `download`
/// installer or by a declared [`Installer`](super::installer::InstallerSpec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSpec {
    /// Installer name, or the sentinel `download` for the built-in strategy.
    pub installer_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_ref: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Package identifier handed to the installer's resolver, e.g.
    /// `cli/cli` or `golang.org/x/tools/gopls`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Inline download descriptor, bypassing any resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// Binary name when it differs from the tool name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_name: Option<String>,
}

impl ToolSpec {
    /// The binary name exposed in the user bin dir.
    pub fn binary_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.bin_name.as_deref().unwrap_or(name)
    }

    pub fn uses_download(&self) -> bool {
        self.installer_ref == DOWNLOAD_INSTALLER
    }

    pub fn validate(&self, name: &str) -> Result<(), TomeiError> {
        let resource = format!("Tool/{name}");
        if self.installer_ref.is_empty() {
            return Err(TomeiError::Schema {
                resource,
                field: "installerRef".to_string(),
                reason: "installerRef is required".to_string(),
            });
        }
        if self.uses_download() && self.source.is_none() && self.package.is_none() {
            return Err(TomeiError::Schema {
                resource,
                field: "source".to_string(),
                reason: "the download installer needs an inline source or a package".to_string(),
            });
        }
        if let Some(source) = &self.source {
            source.validate(&resource)?;
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = Vec::new();
        // The sentinel `download` installer is built in, not a graph node.
        if !self.uses_download() {
            deps.push(ResourceId::new(ResourceKind::Installer, &self.installer_ref));
        }
        if let Some(runtime) = &self.runtime_ref {
            deps.push(ResourceId::new(ResourceKind::Runtime, runtime));
        }
        if let Some(repo) = &self.repository_ref {
            deps.push(ResourceId::new(ResourceKind::InstallerRepository, repo));
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download_tool() -> ToolSpec {
        ToolSpec {
            installer_ref: DOWNLOAD_INSTALLER.to_string(),
            runtime_ref: None,
            repository_ref: None,
            version: "2.86.0".to_string(),
            package: Some("cli/cli".to_string()),
            source: None,
            commands: None,
            bin_name: None,
        }
    }

    #[test]
    fn download_sentinel_is_not_a_dependency() {
        assert!(download_tool().dependencies().is_empty());
    }

    #[test]
    fn refs_project_to_dependencies() {
        let spec = ToolSpec {
            installer_ref: "go".to_string(),
            runtime_ref: Some("go".to_string()),
            repository_ref: Some("internal".to_string()),
            ..download_tool()
        };
        let deps = spec.dependencies();
        assert_eq!(
            deps,
            vec![
                ResourceId::new(ResourceKind::Installer, "go"),
                ResourceId::new(ResourceKind::Runtime, "go"),
                ResourceId::new(ResourceKind::InstallerRepository, "internal"),
            ]
        );
    }

    #[test]
    fn download_tool_needs_source_or_package() {
        let mut spec = download_tool();
        spec.package = None;
        assert!(spec.validate("gh").is_err());
    }

    #[test]
    fn bin_name_overrides_tool_name() {
        let mut spec = download_tool();
        assert_eq!(spec.binary_name("gh"), "gh");
        spec.bin_name = Some("gh-cli".to_string());
        assert_eq!(spec.binary_name("gh"), "gh-cli");
    }
}
