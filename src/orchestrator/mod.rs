// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Cluster orchestrator — the configure workflow
//!
//! EnsureVariables -> EnsureConfigFiles -> RunProvisioningScript -> StartFileServer
//!
//! Template and provisioning failures abort the run and are returned to the
//! caller. File-server problems are only logged. Every failure is also written
//! to the cluster's log under the step's category.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::{Cluster, ClusterType, ENABLE_IPFS_STACK, ENABLE_RIPPLE_STACK, ENGINE_PATH};
use crate::events::EventHub;
use crate::lifecycle::ShutdownHooks;
use crate::settings::{Paths, Settings};
use crate::shell::{OutputChunk, ProcessInfo, ShellExecutor, ShellOutput, shell_quote};
use crate::strategy::{TemplateSpec, strategy_for};
use crate::template::{self, TemplateEngine, TemplateError, TemplateSource};

pub const CATEGORY_CONFIGURE: &str = "Configure";
pub const CATEGORY_PROVISIONING: &str = "Provisioning";
pub const CATEGORY_FILE_SERVER: &str = "File Server";
pub const CATEGORY_DASHBOARD: &str = "Dashboard";
pub const CATEGORY_PRUNE: &str = "Prune";

/// Shutdown hook name for file-server cleanup
pub const FILE_SERVER_HOOK: &str = "file-server-cleanup";

/// Environment variable carrying the admin password to provisioning scripts
pub const PASSWORD_ENV: &str = "CONTROL_CENTER_ADMIN_PASSWORD";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provisioning script failed with exit code {0}")]
    ProvisioningFailed(i32),

    #[error("Provisioning script ended without an exit code")]
    ProvisioningTerminated,

    #[error("Configure run was cancelled")]
    Cancelled,
}

/// Optional stacks deployed next to the engine, each rendered to its own file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxStack {
    Ipfs,
    Rippled,
}

impl AuxStack {
    pub fn all() -> &'static [AuxStack] {
        &[AuxStack::Ipfs, AuxStack::Rippled]
    }

    /// Config key that enables this stack
    pub fn flag(&self) -> &'static str {
        match self {
            AuxStack::Ipfs => ENABLE_IPFS_STACK,
            AuxStack::Rippled => ENABLE_RIPPLE_STACK,
        }
    }

    pub fn template(&self) -> TemplateSpec {
        match self {
            AuxStack::Ipfs => TemplateSpec {
                name: "ipfs-values",
                file: "local.ipfs.template.values.yaml",
                repo_path: "packages/ops/configs/local.ipfs.template.values.yaml",
            },
            AuxStack::Rippled => TemplateSpec {
                name: "rippled-values",
                file: "local.rippled.template.values.yaml",
                repo_path: "packages/ops/configs/local.rippled.template.values.yaml",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureFlags {
    /// Ask the script to re-pull images and rebuild even when up to date
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileServerState {
    Started,
    AlreadyRunning,
}

/// Outcome of a successful configure run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigureReport {
    pub cluster_id: String,
    /// Variables after merging newly discovered placeholders; callers persist these
    pub variables: BTreeMap<String, String>,
    pub config_files: Vec<PathBuf>,
    pub file_server: FileServerState,
}

/// A template document loaded for one render target
pub struct LoadedTemplate {
    pub spec: TemplateSpec,
    pub doc: Value,
}

/// Running file servers for `configs_dir`: processes matching `filter` whose
/// command line also names the directory being served
fn file_servers(shell: &dyn ShellExecutor, filter: &str, configs_dir: &str) -> Vec<ProcessInfo> {
    shell.list_processes(filter)
        .into_iter()
        .filter(|p| p.command.contains(configs_dir))
        .collect()
}

/// Merge discovered placeholders into existing variables. New names default to
/// an empty string; values already set are never dropped or overwritten.
pub fn merge_variables<'a>(
    existing: &BTreeMap<String, String>,
    discovered: impl IntoIterator<Item = &'a String>,
) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    for name in discovered {
        merged.entry(name.clone()).or_default();
    }
    merged
}

pub struct ClusterOrchestrator {
    shell: Arc<dyn ShellExecutor>,
    hub: Arc<EventHub>,
    hooks: Arc<ShutdownHooks>,
    templates: TemplateEngine,
    paths: Paths,
    template_base_url: Option<String>,
    file_server_script: String,
    file_server_match: String,
    /// Held across the file-server check-then-start. Holds the task of the
    /// server started by this process, if any.
    file_server: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    /// Parent of every background task (file server, dashboard)
    background: CancellationToken,
}

impl ClusterOrchestrator {
    pub fn new(
        shell: Arc<dyn ShellExecutor>,
        hub: Arc<EventHub>,
        hooks: Arc<ShutdownHooks>,
        paths: Paths,
        settings: &Settings,
    ) -> Self {
        Self {
            shell,
            hub,
            hooks,
            templates: TemplateEngine::new(),
            paths,
            template_base_url: settings.template_base_url.clone(),
            file_server_script: settings.file_server_script.clone(),
            file_server_match: settings.file_server_match.clone(),
            file_server: tokio::sync::Mutex::new(None),
            background: CancellationToken::new(),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Run the whole configure workflow on a caller-owned copy of the cluster
    pub async fn configure(
        &self,
        mut cluster: Cluster,
        password: &str,
        flags: ConfigureFlags,
        cancel: &CancellationToken,
    ) -> Result<ConfigureReport, OrchestratorError> {
        let strategy = strategy_for(cluster.cluster_type);
        info!("Configuring {} cluster '{}' ({})", strategy.display_name(), cluster.name, cluster.id);
        self.hub.log(&cluster.id, CATEGORY_CONFIGURE, &format!(
            "Configuring {} cluster '{}'", strategy.display_name(), cluster.name
        ));

        let result = self.configure_steps(&mut cluster, password, flags, cancel).await;
        match &result {
            Ok(report) => {
                self.hub.log(&cluster.id, CATEGORY_CONFIGURE, "Cluster configured");
                info!("Cluster {} configured ({} config files)", cluster.id, report.config_files.len());
            }
            Err(e) => {
                self.hub.log(&cluster.id, CATEGORY_CONFIGURE, &e.to_string());
                error!("Configure of cluster {} failed: {}", cluster.id, e);
            }
        }
        result
    }

    async fn configure_steps(
        &self,
        cluster: &mut Cluster,
        password: &str,
        flags: ConfigureFlags,
        cancel: &CancellationToken,
    ) -> Result<ConfigureReport, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let loaded = self.load_templates(cluster.cluster_type, &cluster.configs).await?;
        self.ensure_variables(cluster, &loaded);
        let config_files = self.ensure_config_files(cluster, &loaded)?;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        self.run_provisioning_script(cluster, password, flags, cancel).await?;

        let file_server = self.start_file_server(&cluster.id).await;
        Ok(ConfigureReport {
            cluster_id: cluster.id.clone(),
            variables: cluster.variables.clone(),
            config_files,
            file_server,
        })
    }

    /// Render targets for a cluster: the engine template plus every enabled stack
    pub fn templates_for(&self, cluster_type: ClusterType, configs: &BTreeMap<String, String>) -> Vec<TemplateSpec> {
        let enabled = |key: &str| configs.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"));
        std::iter::once(strategy_for(cluster_type).engine_template())
            .chain(AuxStack::all().iter().filter(|s| enabled(s.flag())).map(|s| s.template()))
            .collect()
    }

    /// Prefer the engine checkout's copy, then the shipped copy; remote as fallback
    pub fn template_source(&self, spec: &TemplateSpec, configs: &BTreeMap<String, String>) -> TemplateSource {
        let from_checkout = configs.get(ENGINE_PATH)
            .filter(|p| !p.is_empty())
            .map(|p| Path::new(p).join(spec.repo_path))
            .filter(|p| p.exists());
        TemplateSource {
            name: spec.name.to_string(),
            local_path: from_checkout.unwrap_or_else(|| self.paths.templates_dir.join(spec.file)),
            remote_url: self.template_base_url.as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), spec.file)),
        }
    }

    pub async fn load_templates(
        &self,
        cluster_type: ClusterType,
        configs: &BTreeMap<String, String>,
    ) -> Result<Vec<LoadedTemplate>, TemplateError> {
        let mut loaded = Vec::new();
        for spec in self.templates_for(cluster_type, configs) {
            let doc = self.templates.load_document(&self.template_source(&spec, configs)).await?;
            loaded.push(LoadedTemplate { spec, doc });
        }
        Ok(loaded)
    }

    /// Every placeholder across the cluster's templates, mapped to ""
    pub async fn default_variables(
        &self,
        cluster_type: ClusterType,
        configs: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, OrchestratorError> {
        let loaded = self.load_templates(cluster_type, configs).await?;
        let discovered: Vec<String> = loaded.iter()
            .flat_map(|t| template::discover_placeholders(&t.doc))
            .collect();
        Ok(merge_variables(&BTreeMap::new(), &discovered))
    }

    /// Add any newly discovered placeholders to the cluster's variables.
    /// Returns how many were added.
    pub fn ensure_variables(&self, cluster: &mut Cluster, loaded: &[LoadedTemplate]) -> usize {
        let discovered: Vec<String> = loaded.iter()
            .flat_map(|t| template::discover_placeholders(&t.doc))
            .collect();
        let merged = merge_variables(&cluster.variables, &discovered);
        let added = merged.len() - cluster.variables.len();
        if added > 0 {
            self.hub.log(&cluster.id, CATEGORY_CONFIGURE, &format!("Added {} new template variables", added));
        }
        cluster.variables = merged;
        added
    }

    /// Render every loaded template to `{configs_dir}/{cluster_id}-{name}.yaml`
    /// and copy companion static files that are not there yet.
    pub fn ensure_config_files(
        &self,
        cluster: &Cluster,
        loaded: &[LoadedTemplate],
    ) -> Result<Vec<PathBuf>, OrchestratorError> {
        let configs_dir = &self.paths.configs_dir;
        std::fs::create_dir_all(configs_dir)
            .map_err(|source| OrchestratorError::Io { path: configs_dir.clone(), source })?;

        let mut written = Vec::new();
        for t in loaded {
            let dest = configs_dir.join(format!("{}-{}.yaml", cluster.id, t.spec.name));
            template::render_to_file(&template::substitute(&t.doc, &cluster.variables), &dest)?;
            self.hub.log(&cluster.id, CATEGORY_CONFIGURE, &format!("Wrote {}", dest.display()));
            written.push(dest);
        }

        self.copy_static_files(&cluster.id)?;
        Ok(written)
    }

    fn copy_static_files(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        let static_dir = self.paths.static_dir();
        let entries = match std::fs::read_dir(&static_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(OrchestratorError::Io { path: static_dir, source }),
        };
        for entry in entries.flatten() {
            let src = entry.path();
            if !src.is_file() {
                continue;
            }
            let dest = self.paths.configs_dir.join(entry.file_name());
            if dest.exists() {
                continue;
            }
            std::fs::copy(&src, &dest)
                .map_err(|source| OrchestratorError::Io { path: dest.clone(), source })?;
            self.hub.log(cluster_id, CATEGORY_CONFIGURE, &format!("Copied {}", dest.display()));
        }
        Ok(())
    }

    /// Run the cluster type's provisioning script, streaming its output into the log
    pub async fn run_provisioning_script(
        &self,
        cluster: &Cluster,
        password: &str,
        flags: ConfigureFlags,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let script = self.paths.scripts_dir.join(strategy_for(cluster.cluster_type).provisioning_script());
        let args = [
            self.paths.configs_dir.to_string_lossy().to_string(),
            self.paths.assets_dir.to_string_lossy().to_string(),
            flags.force_refresh.to_string(),
            cluster.config(ENGINE_PATH).unwrap_or_default().to_string(),
            cluster.id.clone(),
            cluster.flag(ENABLE_IPFS_STACK).to_string(),
            cluster.flag(ENABLE_RIPPLE_STACK).to_string(),
        ];
        let command = std::iter::once(format!("bash {}", shell_quote(&script.to_string_lossy())))
            .chain(args.iter().map(|a| shell_quote(a)))
            .collect::<Vec<_>>()
            .join(" ");

        self.hub.log(&cluster.id, CATEGORY_PROVISIONING, &format!("Running {}", script.display()));
        let cluster_id = cluster.id.as_str();
        let on_chunk = |chunk: OutputChunk| {
            let text = chunk.text.trim_end();
            if !text.is_empty() {
                self.hub.log(cluster_id, CATEGORY_PROVISIONING, text);
            }
        };

        let env = [(PASSWORD_ENV, password)];
        match self.shell.run_streamed(&command, &env, &on_chunk, cancel).await {
            Some(0) => Ok(()),
            Some(code) => Err(OrchestratorError::ProvisioningFailed(code)),
            None if cancel.is_cancelled() => Err(OrchestratorError::Cancelled),
            None => Err(OrchestratorError::ProvisioningTerminated),
        }
    }

    /// Register the shutdown hook that kills any running file server.
    /// Called at startup; later calls are no-ops.
    pub fn register_cleanup_hook(&self) -> bool {
        let shell = self.shell.clone();
        let filter = self.file_server_match.clone();
        let configs_dir = self.paths.configs_dir.to_string_lossy().to_string();
        self.hooks.register_once(FILE_SERVER_HOOK, Box::new(move || {
            for process in file_servers(shell.as_ref(), &filter, &configs_dir) {
                if shell.kill_process(process.pid) {
                    info!("Stopped file server (pid {})", process.pid);
                } else {
                    warn!("Failed to stop file server (pid {})", process.pid);
                }
            }
        }))
    }

    /// Start the background file server unless one is already running
    pub async fn start_file_server(&self, cluster_id: &str) -> FileServerState {
        let mut started = self.file_server.lock().await;

        // Ours may not be in the process table yet
        if started.as_ref().is_some_and(|task| !task.is_finished()) {
            self.hub.log(cluster_id, CATEGORY_FILE_SERVER, "File server already running");
            return FileServerState::AlreadyRunning;
        }

        let configs_dir = self.paths.configs_dir.to_string_lossy();
        let running = file_servers(self.shell.as_ref(), &self.file_server_match, &configs_dir);
        if let Some(process) = running.first() {
            self.hub.log(cluster_id, CATEGORY_FILE_SERVER, &format!(
                "File server already running (pid {})", process.pid
            ));
            return FileServerState::AlreadyRunning;
        }

        self.register_cleanup_hook();
        let script = self.paths.scripts_dir.join(&self.file_server_script);
        let command = format!(
            "bash {} {}",
            shell_quote(&script.to_string_lossy()),
            shell_quote(&configs_dir)
        );
        self.hub.log(cluster_id, CATEGORY_FILE_SERVER, "Starting file server");
        *started = Some(self.spawn_streamed(cluster_id, CATEGORY_FILE_SERVER, command));
        FileServerState::Started
    }

    /// Launch the strategy's dashboard command in the background
    pub fn open_dashboard(&self, cluster: &Cluster) -> String {
        let command = strategy_for(cluster.cluster_type).dashboard_command().to_string();
        self.hub.log(&cluster.id, CATEGORY_DASHBOARD, &format!("Running {}", command));
        self.spawn_streamed(&cluster.id, CATEGORY_DASHBOARD, command.clone());
        command
    }

    /// Reclaim disk from unused images
    pub async fn prune(&self, cluster: &Cluster) -> ShellOutput {
        let command = strategy_for(cluster.cluster_type).prune_command();
        self.hub.log(&cluster.id, CATEGORY_PRUNE, &format!("Running {}", command));
        let output = self.shell.run(command).await;
        for text in [output.stdout.trim(), output.stderr.trim()] {
            if !text.is_empty() {
                self.hub.log(&cluster.id, CATEGORY_PRUNE, text);
            }
        }
        if let Some(err) = &output.exit_error {
            self.hub.log(&cluster.id, CATEGORY_PRUNE, err);
        }
        output
    }

    /// Stop every background task started by this orchestrator
    pub fn shutdown(&self) {
        self.background.cancel();
    }

    fn spawn_streamed(&self, cluster_id: &str, category: &'static str, command: String) -> JoinHandle<()> {
        let shell = self.shell.clone();
        let hub = self.hub.clone();
        let cluster_id = cluster_id.to_string();
        let cancel = self.background.child_token();
        tokio::spawn(async move {
            let on_chunk = |chunk: OutputChunk| {
                let text = chunk.text.trim_end();
                if !text.is_empty() {
                    hub.log(&cluster_id, category, text);
                }
            };
            match shell.run_streamed(&command, &[], &on_chunk, &cancel).await {
                Some(0) => hub.log(&cluster_id, category, "Exited"),
                Some(code) => {
                    warn!("{} exited with code {}", category, code);
                    hub.log(&cluster_id, category, &format!("Exited with code {}", code));
                }
                None => hub.log(&cluster_id, category, "Stopped"),
            }
        })
    }
}
