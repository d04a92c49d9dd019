//! Event hub — per-cluster log sink and status board
//!
//! Everything the core reports about a cluster goes through here: log lines
//! tagged with a category, check results and phase changes. The latest state is
//! kept for polling and every event is broadcast for live subscribers
//! (the WebSocket stream).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::registry::CheckCategory;
use crate::status::{CheckPhase, CheckResult};

/// Log lines kept per cluster before the oldest are dropped
const MAX_LOG_ENTRIES: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    Log {
        cluster_id: String,
        entry: LogEntry,
    },
    Status {
        cluster_id: String,
        category: CheckCategory,
        result: CheckResult,
    },
    Phase {
        cluster_id: String,
        phase: CheckPhase,
    },
}

impl ClusterEvent {
    pub fn cluster_id(&self) -> &str {
        match self {
            ClusterEvent::Log { cluster_id, .. }
            | ClusterEvent::Status { cluster_id, .. }
            | ClusterEvent::Phase { cluster_id, .. } => cluster_id,
        }
    }
}

/// Latest status of every check for one cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBoard {
    pub phase: Option<CheckPhase>,
    pub system: Vec<CheckResult>,
    pub apps: Vec<CheckResult>,
    pub engine: Vec<CheckResult>,
}

impl StatusBoard {
    fn section(&mut self, category: CheckCategory) -> &mut Vec<CheckResult> {
        match category {
            CheckCategory::System => &mut self.system,
            CheckCategory::Apps => &mut self.apps,
            CheckCategory::Engine => &mut self.engine,
        }
    }

    fn upsert(&mut self, category: CheckCategory, result: CheckResult) {
        let section = self.section(category);
        match section.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => *existing = result,
            None => section.push(result),
        }
    }
}

pub struct EventHub {
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
    boards: RwLock<HashMap<String, StatusBoard>>,
    /// Deleted clusters. Late writes from their background work are dropped.
    forgotten: RwLock<HashSet<String>>,
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            logs: RwLock::new(HashMap::new()),
            boards: RwLock::new(HashMap::new()),
            forgotten: RwLock::new(HashSet::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    fn is_forgotten(&self, cluster_id: &str) -> bool {
        self.forgotten.read().unwrap().contains(cluster_id)
    }

    /// Append a log line for a cluster
    pub fn log(&self, cluster_id: &str, category: &str, message: &str) {
        if self.is_forgotten(cluster_id) {
            return;
        }
        debug!("[{}] {}: {}", cluster_id, category, message);
        let entry = LogEntry {
            timestamp: Utc::now(),
            category: category.to_string(),
            message: message.to_string(),
        };
        {
            let mut logs = self.logs.write().unwrap();
            let lines = logs.entry(cluster_id.to_string()).or_default();
            lines.push(entry.clone());
            if lines.len() > MAX_LOG_ENTRIES {
                let excess = lines.len() - MAX_LOG_ENTRIES;
                lines.drain(..excess);
            }
        }
        let _ = self.tx.send(ClusterEvent::Log { cluster_id: cluster_id.to_string(), entry });
    }

    /// Record and publish a check result
    pub fn status(&self, cluster_id: &str, category: CheckCategory, result: &CheckResult) {
        if self.is_forgotten(cluster_id) {
            return;
        }
        self.boards.write().unwrap()
            .entry(cluster_id.to_string())
            .or_default()
            .upsert(category, result.clone());
        let _ = self.tx.send(ClusterEvent::Status {
            cluster_id: cluster_id.to_string(),
            category,
            result: result.clone(),
        });
    }

    /// Record and publish a status run phase change
    pub fn phase(&self, cluster_id: &str, phase: CheckPhase) {
        if self.is_forgotten(cluster_id) {
            return;
        }
        self.boards.write().unwrap()
            .entry(cluster_id.to_string())
            .or_default()
            .phase = Some(phase);
        let _ = self.tx.send(ClusterEvent::Phase { cluster_id: cluster_id.to_string(), phase });
    }

    pub fn logs(&self, cluster_id: &str) -> Vec<LogEntry> {
        self.logs.read().unwrap().get(cluster_id).cloned().unwrap_or_default()
    }

    pub fn clear_logs(&self, cluster_id: &str) {
        self.logs.write().unwrap().remove(cluster_id);
    }

    pub fn board(&self, cluster_id: &str) -> StatusBoard {
        self.boards.read().unwrap().get(cluster_id).cloned().unwrap_or_default()
    }

    /// Drop all logs and status for a deleted cluster and ignore anything
    /// reported for it afterwards
    pub fn forget(&self, cluster_id: &str) {
        self.forgotten.write().unwrap().insert(cluster_id.to_string());
        self.logs.write().unwrap().remove(cluster_id);
        self.boards.write().unwrap().remove(cluster_id);
    }

    /// Accept events for a cluster id again (re-imported after a delete)
    pub fn revive(&self, cluster_id: &str) {
        self.forgotten.write().unwrap().remove(cluster_id);
    }
}
