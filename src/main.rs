// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Control Center — local Kubernetes environments for the engine platform
//!
//! A local service that:
//! - Checks host readiness, prerequisite tools and engine services per cluster
//! - Renders per-cluster values files from YAML templates
//! - Runs the Minikube / MicroK8s provisioning scripts with streamed logs
//! - Keeps a background file server running for the cluster
//! - Streams logs and check results to the UI over HTTP and WebSocket

mod api;
mod auth;
mod cluster;
mod events;
mod lifecycle;
mod monitoring;
mod orchestrator;
mod registry;
mod settings;
mod shell;
mod status;
mod strategy;
mod template;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Control Center — local cluster setup and status
#[derive(Parser)]
#[command(name = "control-center", version, about = "Local Kubernetes environments for the engine platform")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3010)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Data directory (clusters, rendered configs, settings). Defaults to ~/.control-center
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Shipped scripts and templates. Auto-detected if not set.
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Checks run at once within a status phase
    #[arg(long)]
    check_concurrency: Option<usize>,

    /// Write the cluster export document to this path and exit
    #[arg(long)]
    export: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("control_center=info,actix_web=info")),
        )
        .init();

    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(settings::default_data_dir);
    if !data_dir.join(settings::SETTINGS_FILE).exists() {
        // Leave an editable copy of the defaults behind
        if let Err(e) = settings::Settings::default().save(&data_dir) {
            error!("{}", e);
        }
    }
    let mut app_settings = settings::Settings::load(&data_dir);
    if let Some(dir) = cli.assets_dir {
        app_settings.assets_dir = Some(dir);
    }
    if let Some(n) = cli.check_concurrency {
        app_settings.check_concurrency = n;
    }
    let assets_dir = app_settings.assets_dir.clone().unwrap_or_else(settings::find_assets_dir);
    let paths = settings::Paths::new(&data_dir, &assets_dir);

    let store = cluster::ClusterStore::open(&paths.store_file).map_err(std::io::Error::other)?;

    // --export: dump the store and exit
    if let Some(dest) = cli.export {
        let json = serde_json::to_string_pretty(&store.export()).map_err(std::io::Error::other)?;
        std::fs::write(&dest, json)?;
        println!("Exported {} clusters to {}", store.list().len(), dest.display());
        return Ok(());
    }

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("");
    info!("  Control Center v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Hostname:   {}", hostname);
    info!("  Data dir:   {}", paths.data_dir.display());
    info!("  Assets dir: {}", paths.assets_dir.display());
    info!("  Clusters:   {}", store.list().len());
    info!("  API:        http://{}:{}", cli.bind, cli.port);
    info!("");

    let shell: Arc<dyn shell::ShellExecutor> = Arc::new(shell::SystemShell::new());
    let hub = Arc::new(events::EventHub::new());
    let hooks = Arc::new(lifecycle::ShutdownHooks::new());

    let orchestrator = Arc::new(orchestrator::ClusterOrchestrator::new(
        shell.clone(),
        hub.clone(),
        hooks.clone(),
        paths,
        &app_settings,
    ));
    // File-server cleanup is registered once, up front
    orchestrator.register_cleanup_hook();

    let checker = status::StatusChecker::new(shell, hub.clone(), app_settings.check_concurrency);

    let app_state = web::Data::new(api::AppState::new(
        store,
        hub,
        checker,
        orchestrator,
        monitoring::SystemMonitor::new(),
        Arc::new(auth::SudoValidator),
    ));

    let server_state = app_state.clone();
    let result = HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .configure(api::configure)
    })
    .bind(format!("{}:{}", cli.bind, cli.port))
    .map_err(|e| {
        error!("Failed to bind {}:{}: {}", cli.bind, cli.port, e);
        e
    })?
    .run()
    .await;

    info!("Shutting down");
    app_state.shutdown();
    hooks.run_all();
    result
}
