//! Pluggable manifest parsing.
//!
//! The loader does not understand any concrete manifest syntax. A
//! [`ManifestParser`] turns file content into a stream of [`RawManifest`]
//! records (`apiVersion` / `kind` / `metadata.name` / `spec`); typed decoding
//! and schema checks happen in the loader. A CUE evaluator plugs in here from
//! the outside; the crate ships YAML and JSON parsers for plain manifests and
//! for tests.

use crate::core::TomeiError;
use serde::Deserialize;
use std::path::Path;

/// One parsed manifest document, not yet typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
}

/// Turns manifest file content into structured records.
pub trait ManifestParser: Send + Sync {
    /// File extensions (without dot) this parser accepts in directory scans.
    fn extensions(&self) -> &[&'static str];

    fn parse(&self, content: &str, path: &Path) -> Result<Vec<RawManifest>, TomeiError>;
}

/// Multi-document YAML parser (`---`-separated).
pub struct YamlParser;

impl ManifestParser for YamlParser {
    fn extensions(&self) -> &[&'static str] {
        &["yaml", "yml"]
    }

    fn parse(&self, content: &str, path: &Path) -> Result<Vec<RawManifest>, TomeiError> {
        let mut docs = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value: serde_yaml::Value =
                serde_yaml::Value::deserialize(document).map_err(|e| {
                    TomeiError::ManifestParse { path: path.to_path_buf(), reason: e.to_string() }
                })?;
            if value.is_null() {
                continue;
            }
            let raw: RawManifest = serde_yaml::from_value(value).map_err(|e| {
                TomeiError::ManifestParse { path: path.to_path_buf(), reason: e.to_string() }
            })?;
            docs.push(raw);
        }
        Ok(docs)
    }
}

/// JSON parser: a single document or a top-level array of documents.
pub struct JsonParser;

impl ManifestParser for JsonParser {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn parse(&self, content: &str, path: &Path) -> Result<Vec<RawManifest>, TomeiError> {
        let value: serde_json::Value = serde_json::from_str(content).map_err(|e| {
            TomeiError::ManifestParse { path: path.to_path_buf(), reason: e.to_string() }
        })?;
        let docs = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc).map_err(|e| TomeiError::ManifestParse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
