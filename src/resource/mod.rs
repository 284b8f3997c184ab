//! The typed resource model.
//!
//! Every managed resource has an identity `(Kind, Name)` — [`ResourceId`] —
//! and a typed spec. [`Resource`] is the tagged variant over the five spec
//! types; operations that accept "any resource" (`validate`, `dependencies`,
//! `digest`, `equals`) dispatch on the tag. Specs are immutable values: the
//! loader builds them once and the planner and engine only read them.

pub mod commands;
pub mod digest;
pub mod installer;
pub mod repository;
pub mod runtime;
pub mod source;
pub mod tool;
pub mod toolset;
pub mod version;

pub use commands::CommandSet;
pub use installer::InstallerSpec;
pub use repository::InstallerRepositorySpec;
pub use runtime::RuntimeSpec;
pub use source::{ArchiveKind, Checksum, ChecksumSpec, Source};
pub use tool::ToolSpec;
pub use toolset::ToolSetSpec;
pub use version::VersionKind;

use crate::core::TomeiError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Sentinel installer name selecting the built-in download strategy.
/// It is never a dependency edge.
pub const DOWNLOAD_INSTALLER: &str = "download";

/// The five declarable resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Runtime,
    Tool,
    Installer,
    ToolSet,
    InstallerRepository,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "Runtime",
            Self::Tool => "Tool",
            Self::Installer => "Installer",
            Self::ToolSet => "ToolSet",
            Self::InstallerRepository => "InstallerRepository",
        }
    }

    /// Scheduling priority within an execution layer: lower runs earlier in
    /// the deterministic in-layer ordering.
    pub fn priority(&self) -> u32 {
        match self {
            Self::Runtime => 100,
            Self::InstallerRepository => 150,
            Self::Installer => 200,
            Self::Tool => 300,
            // Expanded away at load time; ordered last if one ever leaks.
            Self::ToolSet => 400,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Runtime" => Some(Self::Runtime),
            "Tool" => Some(Self::Tool),
            "Installer" => Some(Self::Installer),
            "ToolSet" => Some(Self::ToolSet),
            "InstallerRepository" => Some(Self::InstallerRepository),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique resource identity. The canonical string form `Kind/name`
/// is the node key in the dependency graph and the map key in state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    /// Canonical `Kind/name` form.
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Installation strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Download,
    Delegation,
    Commands,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Delegation => write!(f, "delegation"),
            Self::Commands => write!(f, "commands"),
        }
    }
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap())
}

/// Checks the restricted identifier rule: lowercase letters, digits,
/// hyphens, starting with a letter.
pub fn valid_name(name: &str) -> bool {
    name_re().is_match(name)
}

/// A declared resource: identity plus typed spec, dispatching uniform
/// operations on the kind tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub spec: ResourceSpec,
}

/// The tagged spec variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    Runtime(RuntimeSpec),
    Tool(ToolSpec),
    Installer(InstallerSpec),
    ToolSet(ToolSetSpec),
    InstallerRepository(InstallerRepositorySpec),
}

impl Resource {
    pub fn runtime(name: impl Into<String>, spec: RuntimeSpec) -> Self {
        Self { name: name.into(), spec: ResourceSpec::Runtime(spec) }
    }

    pub fn tool(name: impl Into<String>, spec: ToolSpec) -> Self {
        Self { name: name.into(), spec: ResourceSpec::Tool(spec) }
    }

    pub fn installer(name: impl Into<String>, spec: InstallerSpec) -> Self {
        Self { name: name.into(), spec: ResourceSpec::Installer(spec) }
    }

    pub fn toolset(name: impl Into<String>, spec: ToolSetSpec) -> Self {
        Self { name: name.into(), spec: ResourceSpec::ToolSet(spec) }
    }

    pub fn repository(name: impl Into<String>, spec: InstallerRepositorySpec) -> Self {
        Self { name: name.into(), spec: ResourceSpec::InstallerRepository(spec) }
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.spec {
            ResourceSpec::Runtime(_) => ResourceKind::Runtime,
            ResourceSpec::Tool(_) => ResourceKind::Tool,
            ResourceSpec::Installer(_) => ResourceKind::Installer,
            ResourceSpec::ToolSet(_) => ResourceKind::ToolSet,
            ResourceSpec::InstallerRepository(_) => ResourceKind::InstallerRepository,
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind(), &self.name)
    }

    /// The declared version string; kinds without a version return "".
    pub fn version(&self) -> &str {
        match &self.spec {
            ResourceSpec::Runtime(r) => &r.version,
            ResourceSpec::Tool(t) => &t.version,
            _ => "",
        }
    }

    pub fn version_kind(&self) -> VersionKind {
        VersionKind::classify(self.version())
    }

    /// Schema validation; the name rule applies to every kind.
    pub fn validate(&self) -> Result<(), TomeiError> {
        if !valid_name(&self.name) {
            return Err(TomeiError::Schema {
                resource: self.id().qualified(),
                field: "metadata.name".to_string(),
                reason: "names are lowercase alphanumeric with hyphens, starting with a letter"
                    .to_string(),
            });
        }
        match &self.spec {
            ResourceSpec::Runtime(r) => r.validate(&self.name),
            ResourceSpec::Tool(t) => t.validate(&self.name),
            ResourceSpec::Installer(i) => i.validate(&self.name),
            ResourceSpec::ToolSet(s) => s.validate(&self.name),
            ResourceSpec::InstallerRepository(r) => r.validate(&self.name),
        }
    }

    /// Outgoing dependency edges, by identity.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        match &self.spec {
            ResourceSpec::Runtime(r) => r.dependencies(),
            ResourceSpec::Tool(t) => t.dependencies(),
            ResourceSpec::Installer(i) => i.dependencies(),
            ResourceSpec::ToolSet(_) => Vec::new(),
            ResourceSpec::InstallerRepository(r) => r.dependencies(),
        }
    }

    /// Canonical content digest over the normalized spec fields.
    pub fn digest(&self) -> String {
        match &self.spec {
            ResourceSpec::Runtime(r) => digest::digest_of(r),
            ResourceSpec::Tool(t) => digest::digest_of(t),
            ResourceSpec::Installer(i) => digest::digest_of(i),
            ResourceSpec::ToolSet(s) => digest::digest_of(s),
            ResourceSpec::InstallerRepository(r) => digest::digest_of(r),
        }
    }

    /// Digest equality: two specs with equal digests reconcile as equal.
    pub fn equals(&self, other: &Resource) -> bool {
        self.id() == other.id() && self.digest() == other.digest()
    }
}
