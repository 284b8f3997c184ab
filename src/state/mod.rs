//! Persisted installation state.
//!
//! One JSON document records everything tomei has installed, keyed by name
//! within per-kind sections. Entries carry enough information to uninstall a
//! resource without re-reading the original manifest: the recorded refs, the
//! remove command for delegation-managed entries, install and bin paths.
//!
//! The document is written atomically with a side-by-side backup
//! ([`store`]), guarded by an advisory file lock ([`lock`]), and shared
//! across workers during an apply through a mutex-guarded cache ([`cache`]).

pub mod cache;
pub mod lock;
pub mod store;

pub use cache::StateCache;
pub use lock::StateLock;
pub use store::StateStore;

use crate::resource::{ResourceId, ResourceKind, StrategyKind, VersionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Current state document layout version. Readers refuse anything else.
pub const STATE_SCHEMA_VERSION: &str = "v1";

/// Why a state entry is marked for reinstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintReason {
    #[default]
    None,
    RuntimeUpgraded,
    Manual,
    DependencyReinstalled,
}

impl TaintReason {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Fields every state entry records, regardless of kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonState {
    pub name: String,
    pub strategy: StrategyKind,
    /// Declared version string (the alias string for alias versions).
    pub version: String,
    /// Concrete version an alias or `latest` resolved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,
    pub version_kind: VersionKind,
    /// Digest of the spec that produced this entry.
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bin_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "TaintReason::is_none")]
    pub taint_reason: TaintReason,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommonState {
    /// Effective version for equality checks: the resolution when present.
    pub fn effective_version(&self) -> &str {
        self.resolved_version.as_deref().unwrap_or(&self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    #[serde(flatten)]
    pub common: CommonState,
    /// Environment published to delegating resources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_command: Option<String>,
    /// Mirrored from the spec so taint propagation works for persisted-only
    /// runtimes too.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub taint_on_upgrade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    #[serde(flatten)]
    pub common: CommonState,
    pub installer_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerState {
    #[serde(flatten)]
    pub common: CommonState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    /// Recorded so Tools can still install through this installer when it is
    /// no longer declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<crate::resource::CommandSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryState {
    #[serde(flatten)]
    pub common: CommonState,
    pub installer_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_command: Option<String>,
}

/// A state entry of any kind, used for inserts through the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEntry {
    Runtime(RuntimeState),
    Tool(ToolState),
    Installer(InstallerState),
    Repository(RepositoryState),
}

impl StateEntry {
    pub fn common(&self) -> &CommonState {
        match self {
            Self::Runtime(r) => &r.common,
            Self::Tool(t) => &t.common,
            Self::Installer(i) => &i.common,
            Self::Repository(r) => &r.common,
        }
    }

    pub fn id(&self) -> ResourceId {
        let kind = match self {
            Self::Runtime(_) => ResourceKind::Runtime,
            Self::Tool(_) => ResourceKind::Tool,
            Self::Installer(_) => ResourceKind::Installer,
            Self::Repository(_) => ResourceKind::InstallerRepository,
        };
        ResourceId::new(kind, &self.common().name)
    }
}

/// The persisted state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub schema_version: String,
    /// Package registry reference handed to resolvers, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtimes: BTreeMap<String, RuntimeState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub installers: BTreeMap<String, InstallerState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub installer_repositories: BTreeMap<String, RepositoryState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolState>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            registry: None,
            runtimes: BTreeMap::new(),
            installers: BTreeMap::new(),
            installer_repositories: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
            && self.installers.is_empty()
            && self.installer_repositories.is_empty()
            && self.tools.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.common(id).is_some()
    }

    /// The common fields of an entry, if present.
    pub fn common(&self, id: &ResourceId) -> Option<&CommonState> {
        match id.kind {
            ResourceKind::Runtime => self.runtimes.get(&id.name).map(|r| &r.common),
            ResourceKind::Tool => self.tools.get(&id.name).map(|t| &t.common),
            ResourceKind::Installer => self.installers.get(&id.name).map(|i| &i.common),
            ResourceKind::InstallerRepository => {
                self.installer_repositories.get(&id.name).map(|r| &r.common)
            }
            ResourceKind::ToolSet => None,
        }
    }

    pub fn common_mut(&mut self, id: &ResourceId) -> Option<&mut CommonState> {
        match id.kind {
            ResourceKind::Runtime => self.runtimes.get_mut(&id.name).map(|r| &mut r.common),
            ResourceKind::Tool => self.tools.get_mut(&id.name).map(|t| &mut t.common),
            ResourceKind::Installer => self.installers.get_mut(&id.name).map(|i| &mut i.common),
            ResourceKind::InstallerRepository => {
                self.installer_repositories.get_mut(&id.name).map(|r| &mut r.common)
            }
            ResourceKind::ToolSet => None,
        }
    }

    /// Every entry identity, runtimes first, deterministic order.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids = Vec::new();
        ids.extend(self.runtimes.keys().map(|n| ResourceId::new(ResourceKind::Runtime, n)));
        ids.extend(
            self.installer_repositories
                .keys()
                .map(|n| ResourceId::new(ResourceKind::InstallerRepository, n)),
        );
        ids.extend(self.installers.keys().map(|n| ResourceId::new(ResourceKind::Installer, n)));
        ids.extend(self.tools.keys().map(|n| ResourceId::new(ResourceKind::Tool, n)));
        ids
    }

    /// Dependency edges recorded in an entry, mirroring
    /// `Resource::dependencies` for persisted-only resources.
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut deps = Vec::new();
        match id.kind {
            ResourceKind::Runtime | ResourceKind::ToolSet => {}
            ResourceKind::Tool => {
                if let Some(tool) = self.tools.get(&id.name) {
                    if tool.installer_ref != crate::resource::DOWNLOAD_INSTALLER {
                        deps.push(ResourceId::new(ResourceKind::Installer, &tool.installer_ref));
                    }
                    if let Some(runtime) = &tool.runtime_ref {
                        deps.push(ResourceId::new(ResourceKind::Runtime, runtime));
                    }
                    if let Some(repo) = &tool.repository_ref {
                        deps.push(ResourceId::new(ResourceKind::InstallerRepository, repo));
                    }
                }
            }
            ResourceKind::Installer => {
                if let Some(installer) = self.installers.get(&id.name) {
                    if let Some(runtime) = &installer.runtime_ref {
                        deps.push(ResourceId::new(ResourceKind::Runtime, runtime));
                    }
                    if let Some(tool) = &installer.tool_ref {
                        deps.push(ResourceId::new(ResourceKind::Tool, tool));
                    }
                }
            }
            ResourceKind::InstallerRepository => {
                if let Some(repo) = self.installer_repositories.get(&id.name) {
                    deps.push(ResourceId::new(ResourceKind::Installer, &repo.installer_ref));
                    if let Some(tool) = &repo.tool_ref {
                        deps.push(ResourceId::new(ResourceKind::Tool, tool));
                    }
                }
            }
        }
        deps
    }

    pub fn insert(&mut self, entry: StateEntry) {
        match entry {
            StateEntry::Runtime(r) => {
                self.runtimes.insert(r.common.name.clone(), r);
            }
            StateEntry::Tool(t) => {
                self.tools.insert(t.common.name.clone(), t);
            }
            StateEntry::Installer(i) => {
                self.installers.insert(i.common.name.clone(), i);
            }
            StateEntry::Repository(r) => {
                self.installer_repositories.insert(r.common.name.clone(), r);
            }
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<StateEntry> {
        match id.kind {
            ResourceKind::Runtime => self.runtimes.remove(&id.name).map(StateEntry::Runtime),
            ResourceKind::Tool => self.tools.remove(&id.name).map(StateEntry::Tool),
            ResourceKind::Installer => self.installers.remove(&id.name).map(StateEntry::Installer),
            ResourceKind::InstallerRepository => {
                self.installer_repositories.remove(&id.name).map(StateEntry::Repository)
            }
            ResourceKind::ToolSet => None,
        }
    }

    pub fn entry(&self, id: &ResourceId) -> Option<StateEntry> {
        match id.kind {
            ResourceKind::Runtime => self.runtimes.get(&id.name).cloned().map(StateEntry::Runtime),
            ResourceKind::Tool => self.tools.get(&id.name).cloned().map(StateEntry::Tool),
            ResourceKind::Installer => {
                self.installers.get(&id.name).cloned().map(StateEntry::Installer)
            }
            ResourceKind::InstallerRepository => {
                self.installer_repositories.get(&id.name).cloned().map(StateEntry::Repository)
            }
            ResourceKind::ToolSet => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A minimal common block for state fixtures.
    pub fn common(name: &str, version: &str, digest: &str) -> CommonState {
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

    pub fn runtime_entry(name: &str, version: &str, digest: &str) -> RuntimeState {
        RuntimeState {
            common: common(name, version, digest),
            env: BTreeMap::new(),
            bin_dir: None,
            remove_command: None,
            taint_on_upgrade: false,
        }
    }

    pub fn tool_entry(name: &str, version: &str, digest: &str) -> ToolState {
        ToolState {
            common: common(name, version, digest),
            installer_ref: crate::resource::DOWNLOAD_INSTALLER.to_string(),
            runtime_ref: None,
            repository_ref: None,
            package: None,
            remove_command: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::{runtime_entry, tool_entry};

    #[test]
    fn insert_lookup_remove_roundtrip() {
        let mut state = State::new();
        assert!(state.is_empty());

        state.insert(StateEntry::Runtime(runtime_entry("go", "1.25.6", "sha256:aa")));
        let id = ResourceId::new(ResourceKind::Runtime, "go");
        assert!(state.contains(&id));
        assert_eq!(state.common(&id).unwrap().version, "1.25.6");

        state.remove(&id);
        assert!(!state.contains(&id));
        assert!(state.is_empty());
    }

    #[test]
    fn dependencies_of_mirrors_recorded_refs() {
        let mut state = State::new();
        let mut tool = tool_entry("gopls", "0.21.0", "sha256:bb");
        tool.installer_ref = "go".to_string();
        tool.runtime_ref = Some("go".to_string());
        state.insert(StateEntry::Tool(tool));

        let deps = state.dependencies_of(&ResourceId::new(ResourceKind::Tool, "gopls"));
        assert_eq!(
            deps,
            vec![
                ResourceId::new(ResourceKind::Installer, "go"),
                ResourceId::new(ResourceKind::Runtime, "go"),
            ]
        );
    }

    #[test]
    fn download_sentinel_not_a_recorded_dependency() {
        let mut state = State::new();
        state.insert(StateEntry::Tool(tool_entry("gh", "2.86.0", "sha256:cc")));
        assert!(state.dependencies_of(&ResourceId::new(ResourceKind::Tool, "gh")).is_empty());
    }

    #[test]
    fn wire_shape_roundtrips() {
        let mut state = State::new();
        state.insert(StateEntry::Runtime(runtime_entry("go", "1.25.6", "sha256:aa")));
        state.insert(StateEntry::Tool(tool_entry("gh", "2.86.0", "sha256:cc")));

        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(json.contains("\"schemaVersion\": \"v1\""));
        assert!(json.contains("\"runtimes\""));
        assert!(json.contains("\"versionKind\": \"exact\""));

        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
