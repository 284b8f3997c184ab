//! The execution engine: applies a plan layer-by-layer with a bounded
//! worker pool.
//!
//! One apply holds the state lock for its whole duration. Removal waves run
//! first (dependents before dependencies), then install layers
//! (dependencies before dependents). Within a layer every actionable node
//! becomes a task gated by one engine-wide semaphore; the layer boundary is
//! a barrier, and the state cache is flushed once per layer so a crash
//! loses at most one layer of completed work.
//!
//! A failed node poisons only its transitive dependents; independent nodes
//! keep going, and the aggregate failure set surfaces after all layers have
//! terminated. State is never mutated for a failing node.

pub mod cancel;
pub mod events;

pub use cancel::CancelToken;
pub use events::{Event, EventHandler, EventSink};

use crate::planner::{Action, Plan, Summary, UpdateFlags, plan as compute_plan};
use crate::resource::{Resource, ResourceId, ResourceSpec, StrategyKind};
use crate::resolver::{PackageResolver, ResolverRegistry};
use crate::state::{StateCache, StateEntry, StateLock, StateStore, TaintReason};
use crate::strategy::{self, InstallerDef, StrategyContext};
use anyhow::{Context, Result, bail};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Worker pool bounds.
pub const DEFAULT_PARALLEL: usize = 5;
pub const MAX_PARALLEL: usize = 20;

/// What one apply did.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub summary: Summary,
    /// Nodes that executed successfully.
    pub completed: Vec<ResourceId>,
    /// Nodes that failed, with their error messages.
    pub failed: Vec<(ResourceId, String)>,
    /// Nodes skipped because a transitive dependency failed.
    pub skipped: Vec<ResourceId>,
}

pub struct Engine {
    data_dir: PathBuf,
    bin_dir: PathBuf,
    parallel: usize,
    lock_timeout: Option<Duration>,
    resolvers: ResolverRegistry,
    sink: EventSink,
    client: reqwest::Client,
}

impl Engine {
    pub fn new(data_dir: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            bin_dir: bin_dir.into(),
            parallel: DEFAULT_PARALLEL,
            lock_timeout: None,
            resolvers: ResolverRegistry::new(),
            sink: EventSink::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Bounds the worker pool; values clamp into `1..=20`.
    pub fn set_parallel(&mut self, parallel: usize) {
        self.parallel = parallel.clamp(1, MAX_PARALLEL);
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.sink = EventSink::new(Some(handler));
    }

    /// Registers a package resolver under an installer name.
    pub fn set_resolver(&mut self, installer: impl Into<String>, resolver: Arc<dyn PackageResolver>) {
        self.resolvers.register(installer, resolver);
    }

    /// How long to wait for the state lock; `None` fails fast.
    pub fn set_lock_timeout(&mut self, timeout: Option<Duration>) {
        self.lock_timeout = timeout;
    }

    /// Computes a plan without executing or locking.
    pub fn plan(&self, resources: &[Resource], flags: UpdateFlags) -> Result<Plan> {
        let state = StateStore::new(&self.data_dir).load()?;
        Ok(compute_plan(resources, &state, flags)?)
    }

    /// Reconciles the declared resources against state.
    pub async fn apply(
        &self,
        cancel: CancelToken,
        resources: &[Resource],
        flags: UpdateFlags,
    ) -> Result<ApplyReport> {
        let _lock = StateLock::acquire(&self.data_dir, self.lock_timeout).await?;

        let store = Arc::new(StateStore::new(&self.data_dir));
        let state = store.load()?;
        let plan = compute_plan(resources, &state, flags)?;

        if plan.is_noop() {
            info!("nothing to do");
            return Ok(ApplyReport { summary: plan.summary, ..ApplyReport::default() });
        }

        let cache = StateCache::new(state, Arc::clone(&store));

        // Persist taint intent before any execution so a crash mid-apply
        // still reinstalls the promoted tools next run.
        if !plan.tainted.is_empty() {
            for id in &plan.tainted {
                cache.mutate(|state| {
                    if let Some(common) = state.common_mut(id) {
                        common.taint_reason = TaintReason::RuntimeUpgraded;
                    }
                });
            }
            cache.flush()?;
        }

        let scratch = tempfile::Builder::new()
            .prefix("tomei-apply-")
            .tempdir()
            .context("failed to create scratch directory")?;

        let ctx = StrategyContext {
            data_dir: self.data_dir.clone(),
            bin_dir: self.bin_dir.clone(),
            scratch: scratch.path().to_path_buf(),
            client: self.client.clone(),
            resolvers: self.resolvers.clone(),
            installers: Arc::new(installer_defs(resources, &cache)),
            cache: cache.clone(),
            sink: self.sink.clone(),
            cancel: cancel.clone(),
        };

        let declared: HashMap<ResourceId, Resource> =
            resources.iter().map(|r| (r.id(), r.clone())).collect();
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut report = ApplyReport { summary: plan.summary, ..ApplyReport::default() };
        // Failed or skipped nodes; dependents of these never start.
        let mut blocked: HashSet<ResourceId> = HashSet::new();

        self.run_remove_layers(&plan, &ctx, &semaphore, &cancel, &mut report, &mut blocked)
            .await?;
        self.run_install_layers(
            &plan, &declared, &ctx, &semaphore, &cancel, &mut report, &mut blocked,
        )
        .await?;

        cache.flush()?;

        if cancel.is_cancelled() {
            bail!(crate::core::TomeiError::Cancelled);
        }
        if !report.failed.is_empty() {
            let summary = report
                .failed
                .iter()
                .map(|(id, message)| format!("{id}: {message}"))
                .collect::<Vec<_>>()
                .join("; ");
            bail!("apply finished with {} failed resource(s): {summary}", report.failed.len());
        }
        Ok(report)
    }

    async fn run_remove_layers(
        &self,
        plan: &Plan,
        ctx: &StrategyContext,
        semaphore: &Arc<Semaphore>,
        cancel: &CancelToken,
        report: &mut ApplyReport,
        blocked: &mut HashSet<ResourceId>,
    ) -> Result<()> {
        // A removal is blocked when one of its removed dependents failed:
        // taking the dependency away first would orphan the survivor.
        let dependents_of: HashMap<ResourceId, Vec<ResourceId>> = {
            let removed: HashSet<&ResourceId> = plan
                .remove_layers
                .iter()
                .flatten()
                .collect();
            let mut map: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
            ctx.cache.read(|state| {
                for &id in &removed {
                    for dep in state.dependencies_of(id) {
                        if removed.contains(&dep) {
                            map.entry(dep).or_default().push((*id).clone());
                        }
                    }
                }
            });
            map
        };

        for wave in &plan.remove_layers {
            let mut tasks: JoinSet<(ResourceId, Result<(), String>)> = JoinSet::new();
            for id in wave {
                if cancel.is_cancelled() {
                    break;
                }
                let blockers = dependents_of.get(id).cloned().unwrap_or_default();
                if let Some(blocker) = blockers.iter().find(|b| blocked.contains(b)) {
                    self.skip(id, blocker, report, blocked);
                    continue;
                }
                let Some(entry) = ctx.cache.read(|state| state.entry(id)) else {
                    continue;
                };

                let ctx = ctx.clone();
                let semaphore = Arc::clone(semaphore);
                let id = id.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                    let result = remove_one(&ctx, &entry).await;
                    (id, result)
                });
            }
            drain_layer(tasks, report, blocked).await;
            ctx.cache.flush()?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_install_layers(
        &self,
        plan: &Plan,
        declared: &HashMap<ResourceId, Resource>,
        ctx: &StrategyContext,
        semaphore: &Arc<Semaphore>,
        cancel: &CancelToken,
        report: &mut ApplyReport,
        blocked: &mut HashSet<ResourceId>,
    ) -> Result<()> {
        for layer in &plan.install_layers {
            let mut tasks: JoinSet<(ResourceId, Result<(), String>)> = JoinSet::new();
            for id in layer {
                let action = plan.action(id);
                if !action.is_actionable() || action == Action::Remove {
                    continue;
                }
                if cancel.is_cancelled() {
                    break;
                }
                let Some(resource) = declared.get(id) else { continue };

                if let Some(failed_dep) =
                    resource.dependencies().iter().find(|dep| blocked.contains(dep))
                {
                    self.skip(id, failed_dep, report, blocked);
                    continue;
                }

                let ctx = ctx.clone();
                let semaphore = Arc::clone(semaphore);
                let resource = resource.clone();
                let id = id.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                    let result = install_one(&ctx, &resource, action).await;
                    (id, result)
                });
            }
            drain_layer(tasks, report, blocked).await;
            ctx.cache.flush()?;
        }
        Ok(())
    }

    fn skip(
        &self,
        id: &ResourceId,
        cause: &ResourceId,
        report: &mut ApplyReport,
        blocked: &mut HashSet<ResourceId>,
    ) {
        warn!(resource = %id, cause = %cause, "skipping: dependency did not complete");
        self.sink.emit(Event::Error {
            id: id.clone(),
            message: format!("skipped: dependency {cause} did not complete"),
        });
        report.skipped.push(id.clone());
        blocked.insert(id.clone());
    }
}

/// Barrier: waits out every task in the layer and records outcomes.
async fn drain_layer(
    mut tasks: JoinSet<(ResourceId, Result<(), String>)>,
    report: &mut ApplyReport,
    blocked: &mut HashSet<ResourceId>,
) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(()))) => report.completed.push(id),
            Ok((id, Err(message))) => {
                blocked.insert(id.clone());
                report.failed.push((id, message));
            }
            Err(join_error) => {
                // A panicked task poisons nothing but itself; the node has
                // no identity any more, so it only surfaces in the log.
                warn!(error = %join_error, "worker task panicked");
            }
        }
    }
}

/// One install/upgrade/reinstall task: events, version resolution, dispatch,
/// state mutation on success only.
async fn install_one(
    ctx: &StrategyContext,
    resource: &Resource,
    action: Action,
) -> Result<(), String> {
    let id = resource.id();
    ctx.sink.emit(Event::Start {
        id: id.clone(),
        action,
        method: method_of(ctx, resource),
        version: resource.version().to_string(),
    });

    let outcome = async {
        let resolved = strategy::resolve_version(ctx, resource).await?;
        let entry = strategy::execute_install(ctx, resource, action, resolved).await?;
        Ok::<StateEntry, crate::core::TomeiError>(entry)
    }
    .await;

    match outcome {
        Ok(entry) => {
            ctx.cache.insert(entry);
            ctx.sink.emit(Event::Complete { id });
            Ok(())
        }
        Err(error) => {
            let message = format!("[{}] {error}", error.code());
            ctx.sink.emit(Event::Error { id, message: message.clone() });
            Err(message)
        }
    }
}

/// One removal task, driven entirely by the persisted entry.
async fn remove_one(ctx: &StrategyContext, entry: &StateEntry) -> Result<(), String> {
    let id = entry.id();
    ctx.sink.emit(Event::Start {
        id: id.clone(),
        action: Action::Remove,
        method: entry.common().strategy,
        version: entry.common().version.clone(),
    });

    match strategy::execute_remove(ctx, entry).await {
        Ok(()) => {
            ctx.cache.remove(&id);
            ctx.sink.emit(Event::Complete { id });
            Ok(())
        }
        Err(error) => {
            let message = format!("[{}] {error}", error.code());
            ctx.sink.emit(Event::Error { id, message: message.clone() });
            Err(message)
        }
    }
}

/// Merges installer definitions from state (older applies) and the declared
/// set (authoritative).
fn installer_defs(resources: &[Resource], cache: &StateCache) -> HashMap<String, InstallerDef> {
    let mut defs: HashMap<String, InstallerDef> = cache.read(|state| {
        state
            .installers
            .iter()
            .map(|(name, installer)| {
                (
                    name.clone(),
                    InstallerDef {
                        strategy: installer.common.strategy,
                        runtime_ref: installer.runtime_ref.clone(),
                        tool_ref: installer.tool_ref.clone(),
                        commands: installer.commands.clone(),
                    },
                )
            })
            .collect()
    });
    for resource in resources {
        if let ResourceSpec::Installer(spec) = &resource.spec {
            defs.insert(
                resource.name.clone(),
                InstallerDef {
                    strategy: spec.strategy,
                    runtime_ref: spec.runtime_ref.clone(),
                    tool_ref: spec.tool_ref.clone(),
                    commands: spec.commands.clone(),
                },
            );
        }
    }
    defs
}

/// The strategy a resource will execute under, for the Start event.
fn method_of(ctx: &StrategyContext, resource: &Resource) -> StrategyKind {
    match &resource.spec {
        ResourceSpec::Runtime(spec) => spec.strategy,
        ResourceSpec::Installer(spec) => spec.strategy,
        ResourceSpec::Tool(spec) => {
            if spec.uses_download() {
                StrategyKind::Download
            } else {
                ctx.installers
                    .get(&spec.installer_ref)
                    .map_or(StrategyKind::Delegation, |def| def.strategy)
            }
        }
        ResourceSpec::InstallerRepository(_) | ResourceSpec::ToolSet(_) => StrategyKind::Commands,
    }
}
