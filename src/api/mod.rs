//! REST API for the Control Center UI
//!
//! Long-running work (status checks, configure runs) is started here and runs
//! in the background; progress is read back from the event hub, either by
//! polling the status/log endpoints or over the WebSocket stream.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::CredentialValidator;
use crate::cluster::{self, ClusterStore, ClusterType, ClusterUpdate, StoreDocument};
use crate::events::EventHub;
use crate::monitoring::SystemMonitor;
use crate::orchestrator::{ClusterOrchestrator, ConfigureFlags, ConfigureReport, OrchestratorError};
use crate::status::StatusChecker;

mod events_ws;

/// State of the latest configure run for a cluster
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded { report: ConfigureReport },
    Failed { error: String, exit_code: Option<i32> },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigureRun {
    pub run_id: String,
    pub started: DateTime<Utc>,
    #[serde(flatten)]
    pub state: RunState,
    #[serde(skip)]
    cancel: CancellationToken,
}

/// Shared application state
pub struct AppState {
    pub store: Mutex<ClusterStore>,
    pub hub: Arc<EventHub>,
    pub checker: StatusChecker,
    pub orchestrator: Arc<ClusterOrchestrator>,
    pub monitor: Mutex<SystemMonitor>,
    pub credentials: Arc<dyn CredentialValidator>,
    runs: Mutex<HashMap<String, ConfigureRun>>,
    status_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        store: ClusterStore,
        hub: Arc<EventHub>,
        checker: StatusChecker,
        orchestrator: Arc<ClusterOrchestrator>,
        monitor: SystemMonitor,
        credentials: Arc<dyn CredentialValidator>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            hub,
            checker,
            orchestrator,
            monitor: Mutex::new(monitor),
            credentials,
            runs: Mutex::new(HashMap::new()),
            status_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Stop a cluster's runs and drop every bit of runtime state held for it
    fn forget_cluster(&self, id: &str) {
        if let Some(run) = self.runs.lock().unwrap().remove(id) {
            run.cancel.cancel();
        }
        if let Some(task) = self.status_tasks.lock().unwrap().remove(id) {
            task.abort();
        }
        self.hub.forget(id);
    }

    /// Cancel background work and close the store
    pub fn shutdown(&self) {
        for run in self.runs.lock().unwrap().values() {
            run.cancel.cancel();
        }
        for task in self.status_tasks.lock().unwrap().values() {
            task.abort();
        }
        self.orchestrator.shutdown();
        if let Err(e) = self.store.lock().unwrap().close() {
            error!("Failed to close cluster store: {}", e);
        }
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Cluster not found" }))
}

fn bad_request(msg: impl ToString) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": msg.to_string() }))
}

fn server_error(msg: impl ToString) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({ "error": msg.to_string() }))
}

// ─── Host & defaults ───

/// GET /api/host — introspected host facts
pub async fn get_host(state: web::Data<AppState>) -> HttpResponse {
    let info = state.monitor.lock().unwrap().collect();
    HttpResponse::Ok().json(info)
}

/// GET /api/defaults/configs
pub async fn default_configs() -> HttpResponse {
    HttpResponse::Ok().json(cluster::default_configs())
}

#[derive(Deserialize)]
pub struct DefaultVariablesRequest {
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

/// POST /api/defaults/variables — every placeholder in the cluster type's templates
pub async fn default_variables(state: web::Data<AppState>, body: web::Json<DefaultVariablesRequest>) -> HttpResponse {
    match state.orchestrator.default_variables(body.cluster_type, &body.configs).await {
        Ok(vars) => HttpResponse::Ok().json(vars),
        Err(e) => {
            warn!("Default variables for {:?} unavailable: {}", body.cluster_type, e);
            HttpResponse::BadGateway().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

// ─── Clusters ───

/// GET /api/clusters
pub async fn list_clusters(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.store.lock().unwrap().list())
}

#[derive(Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub cluster_type: ClusterType,
    pub configs: Option<BTreeMap<String, String>>,
    pub variables: Option<BTreeMap<String, String>>,
}

/// POST /api/clusters
pub async fn create_cluster(state: web::Data<AppState>, body: web::Json<CreateClusterRequest>) -> HttpResponse {
    let body = body.into_inner();
    let mut store = state.store.lock().unwrap();
    if store.list().iter().any(|c| c.cluster_type == body.cluster_type) {
        return HttpResponse::Conflict().json(serde_json::json!({
            "error": format!("A {:?} cluster already exists", body.cluster_type)
        }));
    }
    let configs = body.configs.unwrap_or_else(cluster::default_configs);
    match store.create(&body.name, body.cluster_type, configs, body.variables.unwrap_or_default()) {
        Ok(created) => HttpResponse::Created().json(created),
        Err(e) => bad_request(e),
    }
}

/// GET /api/clusters/{id}
pub async fn get_cluster(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.store.lock().unwrap().get(&path) {
        Some(c) => HttpResponse::Ok().json(c),
        None => not_found(),
    }
}

/// PUT /api/clusters/{id} — settings workflow; the type cannot change
pub async fn update_cluster(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ClusterUpdate>,
) -> HttpResponse {
    let mut store = state.store.lock().unwrap();
    if store.get(&path).is_none() {
        return not_found();
    }
    match store.update(&path, body.into_inner()) {
        Ok(c) => HttpResponse::Ok().json(c),
        Err(e) => bad_request(e),
    }
}

/// DELETE /api/clusters/{id} — also clears its logs, status and runs
pub async fn delete_cluster(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    let removed = state.store.lock().unwrap().remove(&id);
    match removed {
        Ok(true) => {
            state.forget_cluster(&id);
            HttpResponse::Ok().json(serde_json::json!({ "removed": true }))
        }
        Ok(false) => not_found(),
        Err(e) => server_error(e),
    }
}

// ─── Status ───

/// POST /api/clusters/{id}/status — start a status run, superseding any in flight
pub async fn start_status(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    let Some(cluster) = state.store.lock().unwrap().get(&id) else {
        return not_found();
    };
    let host = state.monitor.lock().unwrap().collect();

    let task_state = state.clone();
    let task = tokio::spawn(async move {
        task_state.checker.check(&cluster, &host).await;
    });
    if let Some(previous) = state.status_tasks.lock().unwrap().insert(id.clone(), task) {
        previous.abort();
    }
    HttpResponse::Accepted().json(serde_json::json!({ "started": true, "cluster_id": id }))
}

/// GET /api/clusters/{id}/status — latest result of every check
pub async fn get_status(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    if state.store.lock().unwrap().get(&path).is_none() {
        return not_found();
    }
    HttpResponse::Ok().json(state.hub.board(&path))
}

// ─── Configure ───

#[derive(Deserialize)]
pub struct ConfigureRequest {
    pub password: String,
    #[serde(default)]
    pub force_refresh: bool,
}

/// POST /api/clusters/{id}/configure
pub async fn start_configure(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ConfigureRequest>,
) -> HttpResponse {
    let id = path.into_inner();
    let Some(cluster) = state.store.lock().unwrap().get(&id) else {
        return not_found();
    };
    let body = body.into_inner();
    if !state.credentials.validate(&body.password).await {
        return HttpResponse::Unauthorized().json(serde_json::json!({ "error": "Invalid admin password" }));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let run = ConfigureRun {
        run_id: run_id.clone(),
        started: Utc::now(),
        state: RunState::Running,
        cancel: cancel.clone(),
    };
    if let Some(previous) = state.runs.lock().unwrap().insert(id.clone(), run.clone()) {
        info!("Superseding configure run {} for cluster {}", previous.run_id, id);
        previous.cancel.cancel();
    }

    let task_state = state.clone();
    let flags = ConfigureFlags { force_refresh: body.force_refresh };
    tokio::spawn(async move {
        let result = task_state.orchestrator.configure(cluster, &body.password, flags, &cancel).await;
        let outcome = match result {
            Ok(report) => {
                persist_variables(&task_state, &report);
                RunState::Succeeded { report }
            }
            Err(OrchestratorError::Cancelled) => RunState::Cancelled,
            Err(e) => RunState::Failed {
                exit_code: match e {
                    OrchestratorError::ProvisioningFailed(code) => Some(code),
                    _ => None,
                },
                error: e.to_string(),
            },
        };
        let mut runs = task_state.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&id).filter(|r| r.run_id == run_id) {
            run.state = outcome;
        }
    });

    HttpResponse::Accepted().json(run)
}

/// Write variables merged during a run back to the store
fn persist_variables(state: &AppState, report: &ConfigureReport) {
    let mut store = state.store.lock().unwrap();
    let Some(current) = store.get(&report.cluster_id) else { return };
    if current.variables == report.variables {
        return;
    }
    let merged = crate::orchestrator::merge_variables(&current.variables, report.variables.keys());
    let update = ClusterUpdate { variables: Some(merged), ..Default::default() };
    if let Err(e) = store.update(&report.cluster_id, update) {
        error!("Failed to save variables for cluster {}: {}", report.cluster_id, e);
    }
}

/// GET /api/clusters/{id}/configure — latest run
pub async fn get_configure(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.runs.lock().unwrap().get(path.as_str()) {
        Some(run) => HttpResponse::Ok().json(run),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "No configure run" })),
    }
}

/// POST /api/clusters/{id}/configure/cancel
pub async fn cancel_configure(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.runs.lock().unwrap().get(path.as_str()) {
        Some(run) if matches!(run.state, RunState::Running) => {
            run.cancel.cancel();
            HttpResponse::Ok().json(serde_json::json!({ "cancelled": true }))
        }
        Some(_) => HttpResponse::Ok().json(serde_json::json!({ "cancelled": false })),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "No configure run" })),
    }
}

// ─── Logs ───

/// GET /api/clusters/{id}/logs
pub async fn get_logs(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(state.hub.logs(&path))
}

/// DELETE /api/clusters/{id}/logs
pub async fn clear_logs(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    state.hub.clear_logs(&path);
    HttpResponse::Ok().json(serde_json::json!({ "cleared": true }))
}

// ─── Cluster tools ───

/// POST /api/clusters/{id}/dashboard
pub async fn open_dashboard(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Some(cluster) = state.store.lock().unwrap().get(&path) else {
        return not_found();
    };
    let command = state.orchestrator.open_dashboard(&cluster);
    HttpResponse::Accepted().json(serde_json::json!({ "command": command }))
}

/// POST /api/clusters/{id}/prune
pub async fn prune(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Some(cluster) = state.store.lock().unwrap().get(&path) else {
        return not_found();
    };
    let output = state.orchestrator.prune(&cluster).await;
    HttpResponse::Ok().json(output)
}

// ─── Export / import ───

/// GET /api/export
pub async fn export(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.store.lock().unwrap().export())
}

/// POST /api/import — replaces every cluster
pub async fn import(state: web::Data<AppState>, body: web::Json<StoreDocument>) -> HttpResponse {
    let doc = body.into_inner();
    let imported: Vec<String> = doc.clusters.iter().map(|c| c.id.clone()).collect();
    let result = state.store.lock().unwrap().import(doc);
    match result {
        Ok(dropped) => {
            for id in &dropped {
                state.forget_cluster(id);
            }
            for id in &imported {
                state.hub.revive(id);
            }
            HttpResponse::Ok().json(serde_json::json!({ "imported": true, "dropped": dropped }))
        }
        Err(e) => bad_request(e),
    }
}

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Host & defaults
        .route("/api/host", web::get().to(get_host))
        .route("/api/defaults/configs", web::get().to(default_configs))
        .route("/api/defaults/variables", web::post().to(default_variables))
        // Clusters
        .route("/api/clusters", web::get().to(list_clusters))
        .route("/api/clusters", web::post().to(create_cluster))
        .route("/api/clusters/{id}", web::get().to(get_cluster))
        .route("/api/clusters/{id}", web::put().to(update_cluster))
        .route("/api/clusters/{id}", web::delete().to(delete_cluster))
        // Status
        .route("/api/clusters/{id}/status", web::post().to(start_status))
        .route("/api/clusters/{id}/status", web::get().to(get_status))
        // Configure
        .route("/api/clusters/{id}/configure", web::post().to(start_configure))
        .route("/api/clusters/{id}/configure", web::get().to(get_configure))
        .route("/api/clusters/{id}/configure/cancel", web::post().to(cancel_configure))
        // Logs
        .route("/api/clusters/{id}/logs", web::get().to(get_logs))
        .route("/api/clusters/{id}/logs", web::delete().to(clear_logs))
        // Tools
        .route("/api/clusters/{id}/dashboard", web::post().to(open_dashboard))
        .route("/api/clusters/{id}/prune", web::post().to(prune))
        // Export / import
        .route("/api/export", web::get().to(export))
        .route("/api/import", web::post().to(import))
        // Live events
        .route("/ws/clusters/{id}/events", web::get().to(events_ws::cluster_events_ws));
}
