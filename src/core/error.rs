//! Error handling for tomei.
//!
//! The error system is built around two types:
//! - [`TomeiError`] - enumerated error kinds for every failure case, each
//!   carrying a short stable code (`E1xx` dependency, `E2xx` config, `E3xx`
//!   install, `E4xx` network, `E5xx` state, `E6xx` resolver)
//! - [`ErrorContext`] - wrapper that adds a user-facing hint and renders the
//!   error with colors for CLI display
//!
//! Library code returns `TomeiError` (or `anyhow::Error` wrapping one at the
//! edges); the CLI converts the terminal error into an [`ErrorContext`] before
//! printing. Codes are stable across releases so scripts can match on them.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All error kinds produced by the reconciliation core.
///
/// Each variant maps to exactly one stable code, available via
/// [`TomeiError::code`]. Variants carry enough context (resource names, paths,
/// URLs) to render an actionable message without re-deriving state.
#[derive(Error, Debug)]
pub enum TomeiError {
    // ---- E1xx: dependency ----
    /// The declared resources contain a dependency cycle.
    #[error("circular dependency detected: {path}")]
    DependencyCycle {
        /// Cycle path joined with arrows, e.g. `Installer/a → Tool/b → Installer/a`.
        path: String,
    },

    /// A resource references another that is neither declared nor in state.
    #[error("{resource} references {reference}, which is not declared and not installed")]
    MissingReference { resource: String, reference: String },

    /// A resource planned for removal still has live dependents.
    #[error("cannot remove {resource}: still required by {}", dependents.join(", "))]
    RemoveBlocked { resource: String, dependents: Vec<String> },

    // ---- E2xx: config ----
    /// A manifest file could not be parsed at all.
    #[error("failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// A parsed manifest violates the schema.
    #[error("invalid manifest for {resource}: {field}: {reason}")]
    Schema { resource: String, field: String, reason: String },

    /// The manifest set declares the same `(Kind, Name)` twice.
    #[error("duplicate resource name: {id}")]
    DuplicateName { id: String },

    /// ToolSet expansion produced an invalid or colliding Tool.
    #[error("failed to expand toolset {toolset}: {reason}")]
    ToolSetExpand { toolset: String, reason: String },

    // ---- E3xx: install ----
    /// Downloaded artifact does not match the declared checksum.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch { url: String, expected: String, actual: String },

    /// A delegation-managed entry is being removed but recorded no remove command.
    #[error("{resource} has no remove command recorded; refusing to remove")]
    MissingRemoveCommand { resource: String },

    /// Archive extraction failed.
    #[error("failed to extract {archive}: {reason}")]
    ExtractFailed { archive: String, reason: String },

    /// A user-declared command exited nonzero.
    #[error("command `{command}` for {resource} exited with status {status}")]
    CommandFailed { resource: String, command: String, status: i32 },

    /// The expected binary was not found in the installed tree.
    #[error("binary {name} not found in installed files for {resource}")]
    BinaryNotFound { resource: String, name: String },

    /// The apply was cancelled before this node could finish.
    #[error("apply cancelled")]
    Cancelled,

    // ---- E4xx: network ----
    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Connection-level failure.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    // ---- E5xx: state ----
    /// Another process holds the state lock.
    #[error("state is locked by another process{}", holder.map(|pid| format!(" (pid {pid})")).unwrap_or_default())]
    StateLocked { path: PathBuf, holder: Option<u32> },

    /// The state file exists but cannot be decoded.
    #[error("state file {path} is corrupt: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    /// The state file uses a schema version this binary does not understand.
    #[error("state file {path} has unsupported schema version {version}")]
    StateVersion { path: PathBuf, version: String },

    /// Filesystem failure touching the state files.
    #[error("state I/O error at {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ---- E6xx: resolver ----
    /// The package resolver does not know the requested package.
    #[error("package {package} not found by resolver {installer}")]
    PackageNotFound { package: String, installer: String },

    /// The resolver knows the package but not for this platform.
    #[error("package {package} has no artifact for {os}/{arch}")]
    PlatformUnsupported { package: String, os: String, arch: String },
}

impl TomeiError {
    /// Stable short code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DependencyCycle { .. } => "E101",
            Self::MissingReference { .. } => "E102",
            Self::RemoveBlocked { .. } => "E103",
            Self::ManifestParse { .. } => "E201",
            Self::Schema { .. } => "E202",
            Self::DuplicateName { .. } => "E203",
            Self::ToolSetExpand { .. } => "E204",
            Self::ChecksumMismatch { .. } => "E301",
            Self::MissingRemoveCommand { .. } => "E302",
            Self::ExtractFailed { .. } => "E303",
            Self::CommandFailed { .. } => "E304",
            Self::BinaryNotFound { .. } => "E305",
            Self::Cancelled => "E306",
            Self::HttpStatus { .. } => "E401",
            Self::Network { .. } => "E402",
            Self::StateLocked { .. } => "E501",
            Self::StateCorrupt { .. } => "E502",
            Self::StateVersion { .. } => "E503",
            Self::StateIo { .. } => "E504",
            Self::PackageNotFound { .. } => "E601",
            Self::PlatformUnsupported { .. } => "E602",
        }
    }

    /// A short, actionable suggestion for the user, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::DependencyCycle { .. } => {
                Some("break the cycle by removing one of the references".into())
            }
            Self::MissingReference { reference, .. } => {
                Some(format!("declare {reference} in your manifests or install it first"))
            }
            Self::RemoveBlocked { dependents, .. } => Some(format!(
                "remove {} in the same apply, or keep this resource declared",
                dependents.join(", ")
            )),
            Self::ChecksumMismatch { .. } => {
                Some("the upstream artifact changed or the manifest checksum is stale".into())
            }
            Self::StateLocked { path, .. } => Some(format!(
                "wait for the other tomei process to finish, or delete {} if it crashed",
                path.display()
            )),
            Self::StateCorrupt { path, .. } => Some(format!(
                "restore {} from {}.bak or re-apply from scratch",
                path.display(),
                path.display()
            )),
            Self::StateVersion { .. } => {
                Some("this state file was written by a newer tomei; upgrade the binary".into())
            }
            Self::MissingRemoveCommand { .. } => {
                Some("re-declare the resource with a remove command, then apply again".into())
            }
            _ => None,
        }
    }
}

/// User-facing wrapper rendering a [`TomeiError`] with its code and hint.
pub struct ErrorContext {
    error: TomeiError,
    details: Option<String>,
}

impl ErrorContext {
    pub fn new(error: TomeiError) -> Self {
        Self { error, details: None }
    }

    /// Attach extra detail lines shown below the main message.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{self}");
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} {}",
            "error".red().bold(),
            format!("[{}]", self.error.code()).red(),
            self.error
        )?;
        if let Some(details) = &self.details {
            writeln!(f, "  {details}")?;
        }
        if let Some(hint) = self.error.hint() {
            write!(f, "  {} {hint}", "hint:".yellow())?;
        }
        Ok(())
    }
}
