//! Manifest loading: files on disk to a validated, expanded resource set.
//!
//! `Load` is total and pure — it never touches the network or state. The
//! pipeline per file is parse (pluggable, see [`parser`]) → apiVersion gate →
//! typed decode per kind → `validate()` → ToolSet expansion → duplicate
//! check. Directory inputs load every matching file at the top level,
//! non-recursively, in name order for determinism.

pub mod parser;

pub use parser::{JsonParser, ManifestParser, RawManifest, YamlParser};

use crate::core::TomeiError;
use crate::resource::{Resource, ResourceId, ResourceKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The only accepted manifest apiVersion.
pub const API_VERSION: &str = "tomei.terassyi.net/v1beta1";

pub struct Loader {
    parser: Arc<dyn ManifestParser>,
}

impl Loader {
    pub fn new(parser: Arc<dyn ManifestParser>) -> Self {
        Self { parser }
    }

    /// Loads every manifest from the given file or directory paths into an
    /// ordered resource set with unique identities. ToolSets are expanded
    /// into their member Tools and discarded.
    pub fn load(&self, paths: &[PathBuf]) -> Result<Vec<Resource>, TomeiError> {
        let mut resources = Vec::new();
        for file in self.collect_files(paths)? {
            let content = std::fs::read_to_string(&file).map_err(|e| {
                TomeiError::ManifestParse { path: file.clone(), reason: e.to_string() }
            })?;
            for raw in self.parser.parse(&content, &file)? {
                resources.push(decode(raw)?);
            }
        }

        let resources = expand_toolsets(resources)?;

        let mut seen: HashSet<ResourceId> = HashSet::new();
        for resource in &resources {
            resource.validate()?;
            if !seen.insert(resource.id()) {
                return Err(TomeiError::DuplicateName { id: resource.id().qualified() });
            }
        }

        debug!(count = resources.len(), "loaded resources");
        Ok(resources)
    }

    fn collect_files(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, TomeiError> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                    .map_err(|e| TomeiError::ManifestParse {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && self.matches_extension(p))
                    .collect();
                entries.sort();
                files.extend(entries);
            } else {
                files.push(path.clone());
            }
        }
        Ok(files)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.parser.extensions().contains(&ext))
    }
}

/// Typed decode of one raw document, gated on the apiVersion.
fn decode(raw: RawManifest) -> Result<Resource, TomeiError> {
    if raw.api_version != API_VERSION {
        return Err(TomeiError::Schema {
            resource: format!("{}/{}", raw.kind, raw.metadata.name),
            field: "apiVersion".to_string(),
            reason: format!("unknown apiVersion {:?}, expected {API_VERSION:?}", raw.api_version),
        });
    }

    let kind = ResourceKind::parse(&raw.kind).ok_or_else(|| TomeiError::Schema {
        resource: format!("{}/{}", raw.kind, raw.metadata.name),
        field: "kind".to_string(),
        reason: format!("unknown kind {:?}", raw.kind),
    })?;

    let name = raw.metadata.name;
    let schema_err = |e: serde_json::Error| TomeiError::Schema {
        resource: format!("{kind}/{name}"),
        field: "spec".to_string(),
        reason: e.to_string(),
    };

    let resource = match kind {
        ResourceKind::Runtime => {
            Resource::runtime(&name, serde_json::from_value(raw.spec).map_err(schema_err)?)
        }
        ResourceKind::Tool => {
            Resource::tool(&name, serde_json::from_value(raw.spec).map_err(schema_err)?)
        }
        ResourceKind::Installer => {
            Resource::installer(&name, serde_json::from_value(raw.spec).map_err(schema_err)?)
        }
        ResourceKind::ToolSet => {
            Resource::toolset(&name, serde_json::from_value(raw.spec).map_err(schema_err)?)
        }
        ResourceKind::InstallerRepository => {
            Resource::repository(&name, serde_json::from_value(raw.spec).map_err(schema_err)?)
        }
    };
    Ok(resource)
}

/// Replaces each ToolSet with its expanded member Tools.
fn expand_toolsets(resources: Vec<Resource>) -> Result<Vec<Resource>, TomeiError> {
    let mut out = Vec::with_capacity(resources.len());
    for resource in resources {
        match resource.spec {
            crate::resource::ResourceSpec::ToolSet(ref set) => {
                set.validate(&resource.name)?;
                for (tool_name, tool_spec) in set.expand(&resource.name)? {
                    out.push(Resource::tool(tool_name, tool_spec));
                }
            }
            _ => out.push(resource),
        }
    }
    Ok(out)
}
