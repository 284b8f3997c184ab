//! ToolSet resources: groups of Tools sharing a common base.
//!
//! A ToolSet never reaches the planner. The loader expands it into one Tool
//! per entry by deep-merging the shared base under each entry's own fields,
//! then discards the set itself.

use super::tool::ToolSpec;
use crate::core::TomeiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSetSpec {
    /// Partial [`ToolSpec`] fields shared by every entry.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub base: Value,
    pub tools: Vec<ToolSetEntry>,
}

/// One entry: a name plus partial [`ToolSpec`] fields overriding the base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSetEntry {
    pub name: String,
    #[serde(flatten)]
    pub overrides: Value,
}

impl ToolSetSpec {
    pub fn validate(&self, name: &str) -> Result<(), TomeiError> {
        if self.tools.is_empty() {
            return Err(TomeiError::Schema {
                resource: format!("ToolSet/{name}"),
                field: "tools".to_string(),
                reason: "a toolset must contain at least one tool".to_string(),
            });
        }
        Ok(())
    }

    /// Expands into `(name, ToolSpec)` pairs.
    ///
    /// Entry fields win over base fields; nested objects merge key-by-key.
    /// Each merged value must decode into a valid [`ToolSpec`].
    pub fn expand(&self, set_name: &str) -> Result<Vec<(String, ToolSpec)>, TomeiError> {
        let mut tools = Vec::with_capacity(self.tools.len());
        for entry in &self.tools {
            let mut merged = self.base.clone();
            if merged.is_null() {
                merged = Value::Object(serde_json::Map::new());
            }
            deep_merge(&mut merged, &entry.overrides);

            let spec: ToolSpec =
                serde_json::from_value(merged).map_err(|e| TomeiError::ToolSetExpand {
                    toolset: set_name.to_string(),
                    reason: format!("tool {}: {e}", entry.name),
                })?;
            spec.validate(&entry.name)?;
            tools.push((entry.name.clone(), spec));
        }
        Ok(tools)
    }
}

/// Merges `overlay` onto `target`. Objects merge recursively; any other
/// overlay value replaces the target value wholesale.
fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => {
            if !overlay.is_null() {
                *target = overlay.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expand_merges_base_under_entries() {
        let set = ToolSetSpec {
            base: json!({"installerRef": "go", "runtimeRef": "go"}),
            tools: vec![
                ToolSetEntry {
                    name: "gopls".to_string(),
                    overrides: json!({"package": "golang.org/x/tools/gopls", "version": "0.21.0"}),
                },
                ToolSetEntry {
                    name: "staticcheck".to_string(),
                    overrides: json!({
                        "package": "honnef.co/go/tools/cmd/staticcheck",
                        "version": "2025.1",
                    }),
                },
            ],
        };

        let tools = set.expand("go-tools").unwrap();
        assert_eq!(tools.len(), 2);

        let (name, gopls) = &tools[0];
        assert_eq!(name, "gopls");
        assert_eq!(gopls.installer_ref, "go");
        assert_eq!(gopls.runtime_ref.as_deref(), Some("go"));
        assert_eq!(gopls.version, "0.21.0");
    }

    #[test]
    fn entry_overrides_win_over_base() {
        let set = ToolSetSpec {
            base: json!({"installerRef": "go", "version": "1.0.0"}),
            tools: vec![ToolSetEntry {
                name: "pinned".to_string(),
                overrides: json!({"package": "example.com/pinned", "version": "2.0.0"}),
            }],
        };
        let tools = set.expand("set").unwrap();
        assert_eq!(tools[0].1.version, "2.0.0");
    }

    #[test]
    fn expand_rejects_invalid_merged_tool() {
        let set = ToolSetSpec {
            // No installerRef anywhere: merged specs fail to decode.
            base: Value::Null,
            tools: vec![ToolSetEntry { name: "broken".to_string(), overrides: json!({}) }],
        };
        let err = set.expand("set").unwrap_err();
        assert_eq!(err.code(), "E204");
    }

    #[test]
    fn empty_toolset_is_rejected() {
        let set = ToolSetSpec { base: Value::Null, tools: Vec::new() };
        assert!(set.validate("empty").is_err());
    }
}
