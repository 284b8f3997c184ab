//! Strategy dispatch: turning a planned action on one resource into
//! filesystem and subprocess work.
//!
//! The engine calls [`execute_install`] for Install/Upgrade/Reinstall and
//! [`execute_remove`] for Remove. Dispatch is by resource kind and strategy:
//! download work goes through [`download`], user commands through
//! [`delegation`] with argv preparation in [`command`]. Successful installs
//! return the [`StateEntry`] the engine records; removals read everything
//! they need from the persisted entry alone.

pub mod archive;
pub mod command;
pub mod delegation;
pub mod download;

use crate::core::TomeiError;
use crate::engine::cancel::CancelToken;
use crate::engine::events::EventSink;
use crate::planner::Action;
use crate::resolver::ResolverRegistry;
use crate::resource::{
    CommandSet, InstallerRepositorySpec, Resource, ResourceId, ResourceSpec, RuntimeSpec, Source,
    StrategyKind, ToolSpec, VersionKind,
};
use crate::state::{
    CommonState, InstallerState, RepositoryState, RuntimeState, StateCache, StateEntry, TaintReason,
    ToolState,
};
use crate::utils::{paths, platform};
use chrono::Utc;
use command::CommandContext;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Installer definition visible at execution time, merged from declared
/// specs and persisted entries.
#[derive(Debug, Clone)]
pub struct InstallerDef {
    pub strategy: StrategyKind,
    pub runtime_ref: Option<String>,
    pub tool_ref: Option<String>,
    pub commands: Option<CommandSet>,
}

/// Everything one strategy invocation needs, shared by value across workers.
#[derive(Clone)]
pub struct StrategyContext {
    pub data_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub scratch: PathBuf,
    pub client: reqwest::Client,
    pub resolvers: ResolverRegistry,
    pub installers: Arc<HashMap<String, InstallerDef>>,
    pub cache: StateCache,
    pub sink: EventSink,
    pub cancel: CancelToken,
}

impl StrategyContext {
    fn installer(&self, name: &str, dependent: &ResourceId) -> Result<InstallerDef, TomeiError> {
        self.installers.get(name).cloned().ok_or_else(|| TomeiError::MissingReference {
            resource: dependent.qualified(),
            reference: format!("Installer/{name}"),
        })
    }

    fn runtime_state(&self, name: &str) -> Option<RuntimeState> {
        self.cache.read(|state| state.runtimes.get(name).cloned())
    }

    fn tool_state(&self, name: &str) -> Option<ToolState> {
        self.cache.read(|state| state.tools.get(name).cloned())
    }
}

/// Resolves an alias/`latest` version to a concrete string before dispatch.
/// Returns `None` when nothing resolves it (exact versions, resolver-driven
/// downloads).
pub async fn resolve_version(
    ctx: &StrategyContext,
    resource: &Resource,
) -> Result<Option<String>, TomeiError> {
    if !matches!(resource.version_kind(), VersionKind::Alias | VersionKind::Latest) {
        return Ok(None);
    }
    let commands = resolution_commands(ctx, resource)?;
    let Some(resolve) = commands.and_then(|c| c.resolve_version) else {
        return Ok(None);
    };

    let id = resource.id();
    let template_ctx = CommandContext {
        package: package_of(resource).unwrap_or_default(),
        version: resource.version().to_string(),
        bin_path: String::new(),
    };
    let argv = command::prepare(&id.qualified(), &resolve, &template_ctx)?;
    let env = environment_for(ctx, resource)?;
    let resolved = delegation::run_capture(&id, &argv, &env, &ctx.sink, &ctx.cancel).await?;
    debug!(resource = %id, resolved, "version resolved");
    Ok(Some(resolved))
}

fn resolution_commands(
    ctx: &StrategyContext,
    resource: &Resource,
) -> Result<Option<CommandSet>, TomeiError> {
    match &resource.spec {
        ResourceSpec::Runtime(spec) => Ok(spec.commands.clone()),
        ResourceSpec::Tool(spec) => {
            if spec.commands.is_some() {
                return Ok(spec.commands.clone());
            }
            if spec.uses_download() {
                return Ok(None);
            }
            Ok(ctx.installer(&spec.installer_ref, &resource.id())?.commands)
        }
        _ => Ok(None),
    }
}

fn package_of(resource: &Resource) -> Option<String> {
    match &resource.spec {
        ResourceSpec::Tool(spec) => spec.package.clone(),
        _ => None,
    }
}

/// Executes Install / Upgrade / Reinstall for a declared resource and
/// returns the state entry to record.
pub async fn execute_install(
    ctx: &StrategyContext,
    resource: &Resource,
    action: Action,
    resolved_version: Option<String>,
) -> Result<StateEntry, TomeiError> {
    match &resource.spec {
        ResourceSpec::Runtime(spec) => {
            install_runtime(ctx, resource, spec, action, resolved_version).await
        }
        ResourceSpec::Tool(spec) => install_tool(ctx, resource, spec, action, resolved_version).await,
        ResourceSpec::Installer(spec) => {
            // Installers are definitions: recording them is the whole install.
            Ok(StateEntry::Installer(InstallerState {
                common: common_state(ctx, resource, spec.strategy, None, None, Vec::new()),
                runtime_ref: spec.runtime_ref.clone(),
                tool_ref: spec.tool_ref.clone(),
                commands: spec.commands.clone(),
            }))
        }
        ResourceSpec::InstallerRepository(spec) => {
            install_repository(ctx, resource, spec, action).await
        }
        ResourceSpec::ToolSet(_) => unreachable!("toolsets are expanded at load time"),
    }
}

async fn install_runtime(
    ctx: &StrategyContext,
    resource: &Resource,
    spec: &RuntimeSpec,
    action: Action,
    resolved_version: Option<String>,
) -> Result<StateEntry, TomeiError> {
    let id = resource.id();
    let version = resolved_version.clone().unwrap_or_else(|| resource.version().to_string());
    let bin_dir = spec
        .bin_dir
        .as_deref()
        .map(paths::expand)
        .transpose()
        .map_err(|e| TomeiError::Schema {
            resource: id.qualified(),
            field: "binDir".to_string(),
            reason: e.to_string(),
        })?;

    let previous_install = ctx.runtime_state(&id.name).and_then(|r| r.common.install_path);

    let (install_path, bin_paths, remove_command) = match spec.strategy {
        StrategyKind::Download => {
            let source = spec.source.as_ref().ok_or_else(|| TomeiError::Schema {
                resource: id.qualified(),
                field: "source".to_string(),
                reason: "download strategy requires a source descriptor".to_string(),
            })?;
            let link_dir = bin_dir.clone().ok_or_else(|| TomeiError::Schema {
                resource: id.qualified(),
                field: "binDir".to_string(),
                reason: "download strategy requires a bin directory".to_string(),
            })?;
            let binaries: Vec<String> = if spec.binaries.is_empty() {
                vec![id.name.clone()]
            } else {
                spec.binaries.clone()
            };
            let installed = download::install(
                &ctx.client,
                &ctx.data_dir,
                &ctx.scratch,
                download::DownloadRequest {
                    id: &id,
                    source,
                    version: &version,
                    section: "runtimes",
                    binaries: &binaries,
                    link_dir: &link_dir,
                },
                &ctx.sink,
                &ctx.cancel,
            )
            .await?;

            // Install-new-then-swap: the superseded tree goes only now.
            if matches!(action, Action::Upgrade | Action::Reinstall)
                && let Some(old) = previous_install.filter(|old| *old != installed.install_path)
            {
                download::remove_version_dir(&old)?;
            }
            (Some(installed.install_path), installed.bin_paths, None)
        }
        StrategyKind::Delegation | StrategyKind::Commands => {
            let commands = spec.commands.clone().unwrap_or_default();
            let template_ctx = CommandContext {
                package: String::new(),
                version: version.clone(),
                bin_path: bin_dir
                    .as_ref()
                    .map(|d| d.join(&id.name).display().to_string())
                    .unwrap_or_default(),
            };
            run_command_install(ctx, &id, action, &commands, &template_ctx, resource, &version)
                .await?;
            let remove =
                commands.remove.map(|c| command::substitute(&c, &template_ctx));
            (None, Vec::new(), remove)
        }
    };

    let common = common_state(
        ctx,
        resource,
        spec.strategy,
        resolved_version,
        install_path,
        bin_paths,
    );

    Ok(StateEntry::Runtime(RuntimeState {
        common,
        env: spec.env.clone(),
        bin_dir,
        remove_command,
        taint_on_upgrade: spec.taint_on_upgrade,
    }))
}

async fn install_tool(
    ctx: &StrategyContext,
    resource: &Resource,
    spec: &ToolSpec,
    action: Action,
    resolved_version: Option<String>,
) -> Result<StateEntry, TomeiError> {
    let id = resource.id();
    let version = resolved_version.clone().unwrap_or_else(|| resource.version().to_string());

    let installer = if spec.uses_download() {
        InstallerDef {
            strategy: StrategyKind::Download,
            runtime_ref: None,
            tool_ref: None,
            commands: None,
        }
    } else {
        ctx.installer(&spec.installer_ref, &id)?
    };

    let previous_install = ctx.tool_state(&id.name).and_then(|t| t.common.install_path);

    let (strategy, install_path, bin_paths, remove_command) = match installer.strategy {
        StrategyKind::Download => {
            let source = resolve_source(ctx, spec, &id, &version).await?;
            let bin_name = spec.binary_name(&id.name).to_string();
            let installed = download::install(
                &ctx.client,
                &ctx.data_dir,
                &ctx.scratch,
                download::DownloadRequest {
                    id: &id,
                    source: &source,
                    version: &version,
                    section: "tools",
                    binaries: std::slice::from_ref(&bin_name),
                    link_dir: &ctx.bin_dir,
                },
                &ctx.sink,
                &ctx.cancel,
            )
            .await?;

            if matches!(action, Action::Upgrade | Action::Reinstall)
                && let Some(old) = previous_install.filter(|old| *old != installed.install_path)
            {
                download::remove_version_dir(&old)?;
            }
            (StrategyKind::Download, Some(installed.install_path), installed.bin_paths, None)
        }
        StrategyKind::Delegation | StrategyKind::Commands => {
            let commands = spec.commands.clone().or_else(|| installer.commands.clone()).unwrap_or_default();
            let template_ctx = CommandContext {
                package: spec.package.clone().unwrap_or_default(),
                version: version.clone(),
                bin_path: delegated_bin_path(ctx, spec, &installer, &id),
            };
            run_command_install(ctx, &id, action, &commands, &template_ctx, resource, &version)
                .await?;
            let remove =
                commands.remove.map(|c| command::substitute(&c, &template_ctx));
            (installer.strategy, None, Vec::new(), remove)
        }
    };

    let common = common_state(ctx, resource, strategy, resolved_version, install_path, bin_paths);
    Ok(StateEntry::Tool(ToolState {
        common,
        installer_ref: spec.installer_ref.clone(),
        runtime_ref: spec.runtime_ref.clone(),
        repository_ref: spec.repository_ref.clone(),
        package: spec.package.clone(),
        remove_command,
    }))
}

async fn install_repository(
    ctx: &StrategyContext,
    resource: &Resource,
    spec: &InstallerRepositorySpec,
    action: Action,
) -> Result<StateEntry, TomeiError> {
    let id = resource.id();
    let template_ctx = CommandContext::default();
    run_command_install(
        ctx,
        &id,
        action,
        &spec.commands,
        &template_ctx,
        resource,
        resource.version(),
    )
    .await?;

    Ok(StateEntry::Repository(RepositoryState {
        common: common_state(ctx, resource, StrategyKind::Commands, None, None, Vec::new()),
        installer_ref: spec.installer_ref.clone(),
        tool_ref: spec.tool_ref.clone(),
        remove_command: spec
            .commands
            .remove
            .as_ref()
            .map(|c| command::substitute(c, &template_ctx)),
    }))
}

/// Shared check-then-install flow for command-driven strategies.
///
/// The `check` probe skips the install command only when state already
/// records this resource at the same resolved version; a forced Reinstall
/// never skips.
async fn run_command_install(
    ctx: &StrategyContext,
    id: &ResourceId,
    action: Action,
    commands: &CommandSet,
    template_ctx: &CommandContext,
    resource: &Resource,
    version: &str,
) -> Result<(), TomeiError> {
    let env = environment_for(ctx, resource)?;

    if action != Action::Reinstall
        && let Some(check) = &commands.check
    {
        let argv = command::prepare(&id.qualified(), check, template_ctx)?;
        let present = delegation::probe(id, &argv, &env, &ctx.sink, &ctx.cancel).await?;
        let recorded = ctx
            .cache
            .read(|state| state.common(id).map(|c| c.effective_version().to_string()));
        if present && recorded.as_deref() == Some(version) {
            debug!(resource = %id, "check passed, skipping install");
            return Ok(());
        }
    }

    let command_line = match action {
        Action::Upgrade => commands.update.as_ref().or(commands.install.as_ref()),
        _ => commands.install.as_ref(),
    };
    let Some(command_line) = command_line else {
        return Err(TomeiError::Schema {
            resource: id.qualified(),
            field: "commands.install".to_string(),
            reason: "no install command declared".to_string(),
        });
    };

    let argv = command::prepare(&id.qualified(), command_line, template_ctx)?;
    delegation::run_streaming(id, &argv, &env, &ctx.sink, &ctx.cancel).await
}

/// Executes a removal from the persisted entry alone.
pub async fn execute_remove(ctx: &StrategyContext, entry: &StateEntry) -> Result<(), TomeiError> {
    let id = entry.id();
    match entry {
        StateEntry::Runtime(runtime) => match runtime.common.strategy {
            StrategyKind::Download => download::remove_installed(
                &ctx.data_dir,
                "runtimes",
                &id.name,
                &runtime.common.bin_paths,
            ),
            _ => {
                let remove = runtime.remove_command.as_deref().ok_or_else(|| {
                    TomeiError::MissingRemoveCommand { resource: id.qualified() }
                })?;
                let mut env = delegation::base_env(&runtime.env);
                if let Some(bin_dir) = &runtime.bin_dir {
                    delegation::prepend_path(&mut env, bin_dir);
                }
                let argv = command::split(&id.qualified(), remove)?;
                delegation::run_streaming(&id, &argv, &env, &ctx.sink, &ctx.cancel).await
            }
        },
        StateEntry::Tool(tool) => match tool.common.strategy {
            StrategyKind::Download => {
                download::remove_installed(&ctx.data_dir, "tools", &id.name, &tool.common.bin_paths)
            }
            _ => {
                let remove = tool.remove_command.as_deref().ok_or_else(|| {
                    TomeiError::MissingRemoveCommand { resource: id.qualified() }
                })?;
                let mut env = delegation::base_env(&Default::default());
                if let Some(runtime) = tool.runtime_ref.as_deref().and_then(|r| ctx.runtime_state(r))
                {
                    delegation::apply_runtime_overlay(&mut env, &runtime);
                }
                let argv = command::split(&id.qualified(), remove)?;
                delegation::run_streaming(&id, &argv, &env, &ctx.sink, &ctx.cancel).await
            }
        },
        // Definitions materialize nothing; deleting the entry suffices.
        StateEntry::Installer(_) => Ok(()),
        StateEntry::Repository(repo) => {
            let remove = repo.remove_command.as_deref().ok_or_else(|| {
                TomeiError::MissingRemoveCommand { resource: id.qualified() }
            })?;
            let mut env = delegation::base_env(&Default::default());
            apply_installer_overlays(
                ctx,
                &mut env,
                Some(&repo.installer_ref),
                repo.tool_ref.as_deref(),
            );
            let argv = command::split(&id.qualified(), remove)?;
            delegation::run_streaming(&id, &argv, &env, &ctx.sink, &ctx.cancel).await
        }
    }
}

/// Resolves the download descriptor: inline source wins, otherwise the
/// resolver registered under the tool's installer name.
async fn resolve_source(
    ctx: &StrategyContext,
    spec: &ToolSpec,
    id: &ResourceId,
    version: &str,
) -> Result<Source, TomeiError> {
    if let Some(source) = &spec.source {
        return Ok(source.clone());
    }
    let package = spec.package.as_deref().ok_or_else(|| TomeiError::Schema {
        resource: id.qualified(),
        field: "package".to_string(),
        reason: "the download installer needs an inline source or a package".to_string(),
    })?;
    let resolver = ctx.resolvers.get(&spec.installer_ref).ok_or_else(|| {
        TomeiError::PackageNotFound {
            package: package.to_string(),
            installer: spec.installer_ref.clone(),
        }
    })?;
    let source = resolver.resolve(package, version, platform::os(), platform::arch()).await?;
    debug!(resource = %id, url = %source.url, "descriptor resolved");
    Ok(source)
}

/// Composes the subprocess environment for a resource per the overlay rules.
fn environment_for(
    ctx: &StrategyContext,
    resource: &Resource,
) -> Result<HashMap<String, String>, TomeiError> {
    match &resource.spec {
        ResourceSpec::Runtime(spec) => {
            let mut env = delegation::base_env(&spec.env);
            if let Some(bin_dir) = spec.bin_dir.as_deref() {
                let dir = paths::expand(bin_dir).map_err(|e| TomeiError::Schema {
                    resource: resource.id().qualified(),
                    field: "binDir".to_string(),
                    reason: e.to_string(),
                })?;
                delegation::prepend_path(&mut env, &dir);
            }
            Ok(env)
        }
        ResourceSpec::Tool(spec) => {
            let mut env = delegation::base_env(&Default::default());
            let installer_refs = if spec.uses_download() {
                (None, None)
            } else {
                let def = ctx.installer(&spec.installer_ref, &resource.id())?;
                (def.runtime_ref, def.tool_ref)
            };
            let runtime_ref = installer_refs.0.or_else(|| spec.runtime_ref.clone());
            apply_installer_overlays(
                ctx,
                &mut env,
                None,
                installer_refs.1.as_deref(),
            );
            if let Some(runtime) = runtime_ref.as_deref().and_then(|r| ctx.runtime_state(r)) {
                delegation::apply_runtime_overlay(&mut env, &runtime);
            }
            Ok(env)
        }
        ResourceSpec::InstallerRepository(spec) => {
            let mut env = delegation::base_env(&Default::default());
            apply_installer_overlays(
                ctx,
                &mut env,
                Some(&spec.installer_ref),
                spec.tool_ref.as_deref(),
            );
            Ok(env)
        }
        _ => Ok(delegation::base_env(&Default::default())),
    }
}

/// Applies PATH/env overlays for an installer's runtime and tool refs.
fn apply_installer_overlays(
    ctx: &StrategyContext,
    env: &mut HashMap<String, String>,
    installer_ref: Option<&str>,
    tool_ref: Option<&str>,
) {
    if let Some(installer) = installer_ref.and_then(|name| ctx.installers.get(name)) {
        if let Some(runtime) = installer.runtime_ref.as_deref().and_then(|r| ctx.runtime_state(r)) {
            delegation::apply_runtime_overlay(env, &runtime);
        }
        if let Some(tool) = installer.tool_ref.as_deref().and_then(|t| ctx.tool_state(t))
            && let Some(dir) = tool.common.bin_paths.first().and_then(|p| p.parent())
        {
            delegation::prepend_path(env, dir);
        }
    }
    if let Some(tool) = tool_ref.and_then(|t| ctx.tool_state(t))
        && let Some(dir) = tool.common.bin_paths.first().and_then(|p| p.parent())
    {
        delegation::prepend_path(env, dir);
    }
}

/// The bin path template value for a command-installed tool.
fn delegated_bin_path(
    ctx: &StrategyContext,
    spec: &ToolSpec,
    installer: &InstallerDef,
    id: &ResourceId,
) -> String {
    let runtime_ref = installer.runtime_ref.as_deref().or(spec.runtime_ref.as_deref());
    let bin_name = spec.binary_name(&id.name);
    runtime_ref
        .and_then(|r| ctx.runtime_state(r))
        .and_then(|r| r.bin_dir)
        .map(|dir| dir.join(bin_name).display().to_string())
        .unwrap_or_else(|| ctx.bin_dir.join(bin_name).display().to_string())
}

/// Builds the common block for a new or refreshed entry, preserving the
/// original `installedAt` across upgrades.
fn common_state(
    ctx: &StrategyContext,
    resource: &Resource,
    strategy: StrategyKind,
    resolved_version: Option<String>,
    install_path: Option<PathBuf>,
    bin_paths: Vec<PathBuf>,
) -> CommonState {
    let id = resource.id();
    let now = Utc::now();
    let installed_at = ctx
        .cache
        .read(|state| state.common(&id).map(|c| c.installed_at))
        .unwrap_or(now);

    CommonState {
        name: id.name,
        strategy,
        version: resource.version().to_string(),
        resolved_version,
        version_kind: resource.version_kind(),
        digest: resource.digest(),
        install_path,
        bin_paths,
        taint_reason: TaintReason::None,
        installed_at,
        updated_at: now,
    }
}
