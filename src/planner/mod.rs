//! The reconciler: diffs declared resources against persisted state and
//! produces per-resource actions.
//!
//! Rules, evaluated in order per node:
//! 1. declared, no state → Install
//! 2. declared, tainted → Reinstall
//! 3. declared, exact version differs → Upgrade
//! 4. declared, alias string differs or an update flag applies → Reinstall
//! 5. declared, latest and an update flag applies → Reinstall
//! 6. declared, digest differs → Upgrade
//! 7. declared, equal → None
//! 8. not declared but in state → Remove
//!
//! After the per-node pass, taint propagation promotes Tools riding on an
//! upgraded `taintOnUpgrade` runtime from None to Reinstall, and removal
//! safety rejects any Remove that still has a surviving dependent.

use crate::core::TomeiError;
use crate::graph::DependencyGraph;
use crate::resource::{Resource, ResourceId, ResourceKind, ResourceSpec, VersionKind};
use crate::state::State;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// `--update-*` flags. `--update-*` is strictly dominant: an eligible
/// alias/latest entry reinstalls whenever its flag applies, equal or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateFlags {
    pub tools: bool,
    pub runtimes: bool,
    pub all: bool,
}

impl UpdateFlags {
    fn applies_to(&self, kind: ResourceKind) -> bool {
        self.all
            || match kind {
                ResourceKind::Tool => self.tools,
                ResourceKind::Runtime => self.runtimes,
                _ => false,
            }
    }
}

/// What the engine should do with one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Upgrade,
    Reinstall,
    Remove,
    None,
}

impl Action {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Reinstall => write!(f, "reinstall"),
            Self::Remove => write!(f, "remove"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Action counts for the plan summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub install: usize,
    pub upgrade: usize,
    pub reinstall: usize,
    pub remove: usize,
}

/// The validated, ordered outcome of a reconcile pass.
#[derive(Debug)]
pub struct Plan {
    /// Action per node, deterministic iteration order.
    pub actions: BTreeMap<ResourceId, Action>,
    /// Execution layers for install/upgrade/reinstall work, dependencies
    /// first. Includes non-actionable and external nodes; the engine skips
    /// them.
    pub install_layers: Vec<Vec<ResourceId>>,
    /// Removal waves, dependents first.
    pub remove_layers: Vec<Vec<ResourceId>>,
    /// Tools promoted to Reinstall by runtime taint propagation; the engine
    /// marks these in state before execution.
    pub tainted: Vec<ResourceId>,
    pub summary: Summary,
}

impl Plan {
    pub fn action(&self, id: &ResourceId) -> Action {
        self.actions.get(id).copied().unwrap_or(Action::None)
    }

    /// True when the apply has nothing to do.
    pub fn is_noop(&self) -> bool {
        self.summary == Summary::default()
    }
}

/// Diffs the declared set against state.
pub fn plan(
    resources: &[Resource],
    state: &State,
    flags: UpdateFlags,
) -> Result<Plan, TomeiError> {
    let graph = DependencyGraph::build(resources, state)?;
    let install_layers = graph.layers()?;

    let declared: HashMap<ResourceId, &Resource> =
        resources.iter().map(|r| (r.id(), r)).collect();

    let mut actions: BTreeMap<ResourceId, Action> = BTreeMap::new();
    for resource in resources {
        actions.insert(resource.id(), decide(resource, state, flags));
    }

    // Rule 8: persisted entries nobody declares any more.
    for id in state.ids() {
        if !declared.contains_key(&id) {
            actions.insert(id, Action::Remove);
        }
    }

    let tainted = propagate_taint(resources, state, &mut actions);
    check_removals(&declared, state, &actions)?;
    let remove_layers = removal_waves(state, &actions);

    let mut summary = Summary::default();
    for action in actions.values() {
        match action {
            Action::Install => summary.install += 1,
            Action::Upgrade => summary.upgrade += 1,
            Action::Reinstall => summary.reinstall += 1,
            Action::Remove => summary.remove += 1,
            Action::None => {}
        }
    }

    debug!(
        install = summary.install,
        upgrade = summary.upgrade,
        reinstall = summary.reinstall,
        remove = summary.remove,
        "plan computed"
    );

    Ok(Plan { actions, install_layers, remove_layers, tainted, summary })
}

/// Rules 1-7 for one declared resource.
fn decide(resource: &Resource, state: &State, flags: UpdateFlags) -> Action {
    let id = resource.id();
    let Some(entry) = state.common(&id) else {
        return Action::Install;
    };

    if !entry.taint_reason.is_none() {
        return Action::Reinstall;
    }

    let update_applies = flags.applies_to(id.kind);
    match entry.version_kind {
        VersionKind::Exact if entry.version != resource.version() => return Action::Upgrade,
        VersionKind::Alias if entry.version != resource.version() || update_applies => {
            // The alias name may be unchanged while its target moved.
            return Action::Reinstall;
        }
        VersionKind::Latest if update_applies => return Action::Reinstall,
        _ => {}
    }

    if entry.digest != resource.digest() {
        return Action::Upgrade;
    }

    Action::None
}

/// Promotes `None` Tools whose runtime is upgrading with `taintOnUpgrade`.
fn propagate_taint(
    resources: &[Resource],
    state: &State,
    actions: &mut BTreeMap<ResourceId, Action>,
) -> Vec<ResourceId> {
    let mut upgraded_runtimes: HashSet<&str> = HashSet::new();
    for resource in resources {
        if let ResourceSpec::Runtime(spec) = &resource.spec
            && spec.taint_on_upgrade
            && matches!(
                actions.get(&resource.id()).copied(),
                Some(Action::Upgrade | Action::Reinstall)
            )
        {
            upgraded_runtimes.insert(resource.name.as_str());
        }
    }
    if upgraded_runtimes.is_empty() {
        return Vec::new();
    }

    let mut tainted = Vec::new();
    for resource in resources {
        let ResourceSpec::Tool(spec) = &resource.spec else { continue };
        let Some(runtime) = spec.runtime_ref.as_deref() else { continue };
        if !upgraded_runtimes.contains(runtime) {
            continue;
        }
        let id = resource.id();
        if actions.get(&id) == Some(&Action::None) && state.contains(&id) {
            actions.insert(id.clone(), Action::Reinstall);
            tainted.push(id);
        }
    }
    tainted
}

/// Rejects removals that would orphan a surviving dependent. Dependents are
/// counted among declared resources (by their declared references) and
/// persisted-only entries (by their recorded references).
fn check_removals(
    declared: &HashMap<ResourceId, &Resource>,
    state: &State,
    actions: &BTreeMap<ResourceId, Action>,
) -> Result<(), TomeiError> {
    let removed: HashSet<&ResourceId> = actions
        .iter()
        .filter_map(|(id, action)| (*action == Action::Remove).then_some(id))
        .collect();
    if removed.is_empty() {
        return Ok(());
    }

    // Reverse edges over the union of declared and persisted resources.
    let mut dependents_of: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
    for (id, resource) in declared {
        for dep in resource.dependencies() {
            dependents_of.entry(dep).or_default().push(id.clone());
        }
    }
    for id in state.ids() {
        if declared.contains_key(&id) {
            continue;
        }
        for dep in state.dependencies_of(&id) {
            dependents_of.entry(dep).or_default().push(id.clone());
        }
    }

    for &id in &removed {
        let Some(dependents) = dependents_of.get(id) else { continue };
        let mut survivors: Vec<String> = dependents
            .iter()
            .filter(|dep| !removed.contains(dep))
            .map(ResourceId::qualified)
            .collect();
        if !survivors.is_empty() {
            survivors.sort();
            return Err(TomeiError::RemoveBlocked {
                resource: id.qualified(),
                dependents: survivors,
            });
        }
    }
    Ok(())
}

/// Orders removals dependents-first. Safe because `check_removals` already
/// guaranteed every dependent of a removed node is itself removed.
fn removal_waves(state: &State, actions: &BTreeMap<ResourceId, Action>) -> Vec<Vec<ResourceId>> {
    let removed: HashSet<ResourceId> = actions
        .iter()
        .filter_map(|(id, action)| (*action == Action::Remove).then(|| id.clone()))
        .collect();
    if removed.is_empty() {
        return Vec::new();
    }

    // blocking[d] = removed dependents of d that must go first.
    let mut blocking: HashMap<&ResourceId, HashSet<&ResourceId>> =
        removed.iter().map(|id| (id, HashSet::new())).collect();
    for id in &removed {
        for dep in state.dependencies_of(id) {
            if let Some(key) = removed.get(&dep)
                && let Some(dependents) = blocking.get_mut(key)
            {
                dependents.insert(id);
            }
        }
    }

    let mut waves = Vec::new();
    let mut done: HashSet<&ResourceId> = HashSet::new();
    while done.len() < removed.len() {
        let mut wave: Vec<&ResourceId> = blocking
            .iter()
            .filter(|(id, blockers)| {
                !done.contains(*id) && blockers.iter().all(|b| done.contains(b))
            })
            .map(|(&id, _)| id)
            .collect();
        debug_assert!(!wave.is_empty());
        wave.sort_by(|a, b| (a.kind.priority(), &a.name).cmp(&(b.kind.priority(), &b.name)));
        // Dependents-first means higher-priority kinds (runtimes) go last.
        wave.reverse();
        done.extend(wave.iter().copied());
        waves.push(wave.into_iter().cloned().collect());
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        CommandSet, DOWNLOAD_INSTALLER, InstallerSpec, RuntimeSpec, StrategyKind, ToolSpec,
    };
    use crate::state::test_support::{runtime_entry, tool_entry};
    use crate::state::{StateEntry, TaintReason};

    fn go_runtime(version: &str, taint_on_upgrade: bool) -> Resource {
        Resource::runtime(
            "go",
            RuntimeSpec {
                version: version.to_string(),
                strategy: StrategyKind::Delegation,
                source: None,
                binaries: Vec::new(),
                bin_dir: None,
                env: Default::default(),
                commands: Some(CommandSet {
                    install: Some("true".to_string()),
                    ..CommandSet::default()
                }),
                taint_on_upgrade,
            },
        )
    }

    fn download_tool(name: &str, version: &str, runtime: Option<&str>) -> Resource {
        Resource::tool(
            name,
            ToolSpec {
                installer_ref: DOWNLOAD_INSTALLER.to_string(),
                runtime_ref: runtime.map(String::from),
                repository_ref: None,
                version: version.to_string(),
                package: Some(format!("example.com/{name}")),
                source: None,
                commands: None,
                bin_name: None,
            },
        )
    }

    /// Fakes a prior successful apply of `resources` into state.
    fn state_after(resources: &[Resource]) -> State {
        let mut state = State::new();
        for resource in resources {
            match &resource.spec {
                ResourceSpec::Runtime(spec) => {
                    let mut entry =
                        runtime_entry(&resource.name, &resource.version(), &resource.digest());
                    entry.taint_on_upgrade = spec.taint_on_upgrade;
                    state.insert(StateEntry::Runtime(entry));
                }
                ResourceSpec::Tool(spec) => {
                    let mut entry =
                        tool_entry(&resource.name, &resource.version(), &resource.digest());
                    entry.installer_ref = spec.installer_ref.clone();
                    entry.runtime_ref = spec.runtime_ref.clone();
                    state.insert(StateEntry::Tool(entry));
                }
                _ => {}
            }
        }
        state
    }

    #[test]
    fn empty_state_installs_everything() {
        let resources =
            vec![go_runtime("1.25.6", false), download_tool("gh", "2.86.0", None)];
        let plan = plan(&resources, &State::new(), UpdateFlags::default()).unwrap();

        assert!(resources.iter().all(|r| plan.action(&r.id()) == Action::Install));
        assert_eq!(plan.summary.install, 2);
        assert_eq!(plan.summary.remove, 0);
    }

    #[test]
    fn double_apply_is_a_noop() {
        let resources =
            vec![go_runtime("1.25.6", false), download_tool("gh", "2.86.0", None)];
        let state = state_after(&resources);

        let plan = plan(&resources, &state, UpdateFlags::default()).unwrap();
        assert!(plan.is_noop());
        assert!(resources.iter().all(|r| plan.action(&r.id()) == Action::None));
    }

    #[test]
    fn exact_version_change_upgrades() {
        let old = vec![go_runtime("1.25.6", false)];
        let state = state_after(&old);

        let new = vec![go_runtime("1.25.7", false)];
        let plan = plan(&new, &state, UpdateFlags::default()).unwrap();
        assert_eq!(plan.action(&new[0].id()), Action::Upgrade);
    }

    #[test]
    fn taint_in_state_forces_reinstall() {
        let resources = vec![download_tool("gh", "2.86.0", None)];
        let mut state = state_after(&resources);
        state
            .common_mut(&resources[0].id())
            .unwrap()
            .taint_reason = TaintReason::Manual;

        let plan = plan(&resources, &state, UpdateFlags::default()).unwrap();
        assert_eq!(plan.action(&resources[0].id()), Action::Reinstall);
    }

    #[test]
    fn latest_reinstalls_only_under_update_flag() {
        let resources = vec![download_tool("gh", "latest", None)];
        let state = state_after(&resources);

        let without = plan(&resources, &state, UpdateFlags::default()).unwrap();
        assert_eq!(without.action(&resources[0].id()), Action::None);

        let with =
            plan(&resources, &state, UpdateFlags { tools: true, ..Default::default() }).unwrap();
        assert_eq!(with.action(&resources[0].id()), Action::Reinstall);
    }

    #[test]
    fn alias_reinstalls_on_update_flag_even_when_equal() {
        let resources = vec![go_runtime("stable", false)];
        let state = state_after(&resources);

        let with = plan(
            &resources,
            &state,
            UpdateFlags { runtimes: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(with.action(&resources[0].id()), Action::Reinstall);
    }

    #[test]
    fn digest_change_upgrades() {
        let old = vec![download_tool("gh", "2.86.0", None)];
        let state = state_after(&old);

        // Same version, different spec content.
        let mut changed = download_tool("gh", "2.86.0", None);
        if let ResourceSpec::Tool(spec) = &mut changed.spec {
            spec.bin_name = Some("gh-cli".to_string());
        }
        let plan = plan(&[changed.clone()], &state, UpdateFlags::default()).unwrap();
        assert_eq!(plan.action(&changed.id()), Action::Upgrade);
    }

    #[test]
    fn runtime_upgrade_taints_dependent_tools() {
        let old = vec![
            go_runtime("1.25.6", true),
            download_tool("gopls", "0.21.0", Some("go")),
            download_tool("gh", "2.86.0", None),
        ];
        let state = state_after(&old);

        let new = vec![
            go_runtime("1.25.7", true),
            download_tool("gopls", "0.21.0", Some("go")),
            download_tool("gh", "2.86.0", None),
        ];
        let plan = plan(&new, &state, UpdateFlags::default()).unwrap();

        assert_eq!(plan.action(&new[0].id()), Action::Upgrade);
        assert_eq!(plan.action(&new[1].id()), Action::Reinstall);
        assert_eq!(plan.action(&new[2].id()), Action::None);
        assert_eq!(plan.tainted, vec![new[1].id()]);
    }

    #[test]
    fn undeclared_entries_are_removed() {
        let old = vec![download_tool("gh", "2.86.0", None)];
        let state = state_after(&old);

        let plan = plan(&[], &state, UpdateFlags::default()).unwrap();
        assert_eq!(plan.action(&old[0].id()), Action::Remove);
        assert_eq!(plan.summary.remove, 1);
    }

    #[test]
    fn remove_blocked_by_surviving_dependent() {
        let old = vec![go_runtime("1.25.6", false), download_tool("gopls", "0.21.0", Some("go"))];
        let state = state_after(&old);

        // Keep gopls declared, drop the runtime it rides on.
        let keep = vec![download_tool("gopls", "0.21.0", Some("go"))];
        let err = plan(&keep, &state, UpdateFlags::default()).unwrap_err();
        assert_eq!(err.code(), "E103");
        assert!(err.to_string().contains("Tool/gopls"));
    }

    #[test]
    fn removal_cascade_orders_dependents_first() {
        let old = vec![
            go_runtime("1.25.6", false),
            download_tool("gopls", "0.21.0", Some("go")),
            download_tool("gh", "2.86.0", None),
        ];
        let state = state_after(&old);

        let plan = plan(&[], &state, UpdateFlags::default()).unwrap();
        assert_eq!(plan.summary.remove, 3);

        let position = |name: &str| {
            plan.remove_layers
                .iter()
                .position(|wave| wave.iter().any(|id| id.name == name))
                .unwrap()
        };
        assert!(position("gopls") < position("go"));
    }
}
