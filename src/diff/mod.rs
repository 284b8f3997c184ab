//! State snapshot diffing: what the last apply changed.
//!
//! Compares `state.json.bak` against `state.json` and reports per kind what
//! was added, removed, or modified, in deterministic order. Two renderings:
//! colorized human output with `+`/`-`/`~` markers, and JSON.

use crate::resource::{ResourceId, ResourceKind};
use crate::state::State;
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write as _;

/// One modified entry, with the version movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Modified {
    pub name: String,
    pub old_version: String,
    pub new_version: String,
}

/// Changes within one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindDiff {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modified: Vec<Modified>,
}

impl KindDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Full diff between two state snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateDiff {
    #[serde(skip_serializing_if = "KindDiff::is_empty")]
    pub runtimes: KindDiff,
    #[serde(skip_serializing_if = "KindDiff::is_empty")]
    pub installers: KindDiff,
    #[serde(skip_serializing_if = "KindDiff::is_empty")]
    pub installer_repositories: KindDiff,
    #[serde(skip_serializing_if = "KindDiff::is_empty")]
    pub tools: KindDiff,
}

impl StateDiff {
    /// Computes the changes from `old` to `new`.
    pub fn between(old: &State, new: &State) -> Self {
        let mut diff = Self::default();
        for kind in [
            ResourceKind::Runtime,
            ResourceKind::Installer,
            ResourceKind::InstallerRepository,
            ResourceKind::Tool,
        ] {
            let slot = match kind {
                ResourceKind::Runtime => &mut diff.runtimes,
                ResourceKind::Installer => &mut diff.installers,
                ResourceKind::InstallerRepository => &mut diff.installer_repositories,
                ResourceKind::Tool => &mut diff.tools,
                ResourceKind::ToolSet => unreachable!(),
            };
            *slot = diff_kind(old, new, kind);
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
            && self.installers.is_empty()
            && self.installer_repositories.is_empty()
            && self.tools.is_empty()
    }

    /// Human rendering with `+`/`-`/`~` markers.
    pub fn render_human(&self) -> String {
        if self.is_empty() {
            return "No changes since last apply".to_string();
        }
        let mut out = String::new();
        for (title, kind_diff) in [
            ("Runtimes", &self.runtimes),
            ("Installers", &self.installers),
            ("Installer repositories", &self.installer_repositories),
            ("Tools", &self.tools),
        ] {
            if kind_diff.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}:", title.bold());
            for name in &kind_diff.added {
                let _ = writeln!(out, "  {} {name}", "+".green());
            }
            for name in &kind_diff.removed {
                let _ = writeln!(out, "  {} {name}", "-".red());
            }
            for modified in &kind_diff.modified {
                let _ = writeln!(
                    out,
                    "  {} {} {} → {}",
                    "~".yellow(),
                    modified.name,
                    modified.old_version,
                    modified.new_version
                );
            }
        }
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn diff_kind(old: &State, new: &State, kind: ResourceKind) -> KindDiff {
    let names = |state: &State| -> Vec<String> {
        state
            .ids()
            .into_iter()
            .filter(|id| id.kind == kind)
            .map(|id| id.name)
            .collect()
    };

    let mut diff = KindDiff::default();
    let old_names = names(old);
    let new_names = names(new);

    for name in &new_names {
        let id = ResourceId::new(kind, name);
        match old.common(&id) {
            None => diff.added.push(name.clone()),
            Some(old_entry) => {
                let new_entry = new.common(&id).expect("name taken from new state");
                if old_entry.effective_version() != new_entry.effective_version()
                    || old_entry.digest != new_entry.digest
                {
                    diff.modified.push(Modified {
                        name: name.clone(),
                        old_version: old_entry.effective_version().to_string(),
                        new_version: new_entry.effective_version().to_string(),
                    });
                }
            }
        }
    }
    for name in &old_names {
        if !new.contains(&ResourceId::new(kind, name)) {
            diff.removed.push(name.clone());
        }
    }

    // BTreeMap iteration already sorts, but make the contract explicit.
    diff.added.sort();
    diff.removed.sort();
    diff.modified.sort_by(|a, b| a.name.cmp(&b.name));
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateEntry;
    use crate::state::test_support::{runtime_entry, tool_entry};

    fn old_state() -> State {
        let mut state = State::new();
        state.insert(StateEntry::Runtime(runtime_entry("go", "1.25.6", "sha256:aa")));
        state.insert(StateEntry::Tool(tool_entry("gh", "2.86.0", "sha256:bb")));
        state.insert(StateEntry::Tool(tool_entry("rg", "14.1.0", "sha256:cc")));
        state
    }

    #[test]
    fn equal_snapshots_diff_empty() {
        let state = old_state();
        let diff = StateDiff::between(&state, &state);
        assert!(diff.is_empty());
        assert_eq!(diff.render_human(), "No changes since last apply");
    }

    #[test]
    fn added_removed_modified_are_categorized() {
        let old = old_state();
        let mut new = old.clone();
        // gh upgraded, rg removed, gopls added.
        new.tools.get_mut("gh").unwrap().common.version = "2.87.0".to_string();
        new.tools.remove("rg");
        new.insert(StateEntry::Tool(tool_entry("gopls", "0.21.0", "sha256:dd")));

        let diff = StateDiff::between(&old, &new);
        assert_eq!(diff.tools.added, vec!["gopls"]);
        assert_eq!(diff.tools.removed, vec!["rg"]);
        assert_eq!(
            diff.tools.modified,
            vec![Modified {
                name: "gh".to_string(),
                old_version: "2.86.0".to_string(),
                new_version: "2.87.0".to_string(),
            }]
        );
        assert!(diff.runtimes.is_empty());
    }

    #[test]
    fn resolved_version_drives_modification() {
        let mut old = State::new();
        let mut entry = tool_entry("gopls", "latest", "sha256:aa");
        entry.common.resolved_version = Some("0.21.0".to_string());
        old.insert(StateEntry::Tool(entry));

        let mut new = old.clone();
        new.tools.get_mut("gopls").unwrap().common.resolved_version =
            Some("0.22.0".to_string());

        let diff = StateDiff::between(&old, &new);
        assert_eq!(diff.tools.modified[0].old_version, "0.21.0");
        assert_eq!(diff.tools.modified[0].new_version, "0.22.0");
    }

    #[test]
    fn human_rendering_uses_markers() {
        colored::control::set_override(false);
        let old = old_state();
        let mut new = old.clone();
        new.insert(StateEntry::Tool(tool_entry("gopls", "0.21.0", "sha256:dd")));

        let rendered = StateDiff::between(&old, &new).render_human();
        assert!(rendered.contains("+ gopls"));
        colored::control::unset_override();
    }

    #[test]
    fn json_rendering_is_stable() {
        let old = old_state();
        let mut new = old.clone();
        new.tools.remove("rg");
        let json = StateDiff::between(&old, &new).render_json().unwrap();
        assert!(json.contains("\"removed\""));
        assert!(json.contains("\"rg\""));
    }
}
