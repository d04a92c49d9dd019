//! Clusters — user-defined deployment targets and their persisted store
//!
//! The store is a single JSON document `{version, clusters}` which doubles as
//! the export/import format. Every mutation is written through immediately
//! (temp file + rename) and only takes effect in memory once the write
//! succeeded. Callers hold the store behind one mutex, which keeps writes
//! single-writer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Schema version written into the store and every export
pub const STORE_VERSION: &str = "1";

/// Config key: path of the engine source checkout
pub const ENGINE_PATH: &str = "ENGINE_PATH";
/// Config key: render and deploy the IPFS stack
pub const ENABLE_IPFS_STACK: &str = "ENABLE_IPFS_STACK";
/// Config key: render and deploy the Rippled stack
pub const ENABLE_RIPPLE_STACK: &str = "ENABLE_RIPPLE_STACK";

/// Supported local Kubernetes distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterType {
    Minikube,
    MicroK8s,
}

impl ClusterType {
    pub fn all() -> &'static [ClusterType] {
        &[ClusterType::Minikube, ClusterType::MicroK8s]
    }
}

/// A persisted deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Cluster {
    pub fn config(&self, key: &str) -> Option<&str> {
        self.configs.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.configs.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Defaults offered when creating a cluster
pub fn default_configs() -> BTreeMap<String, String> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let mut configs = BTreeMap::new();
    configs.insert(
        ENGINE_PATH.to_string(),
        Path::new(&home).join("engine").to_string_lossy().to_string(),
    );
    configs.insert(ENABLE_IPFS_STACK.to_string(), "false".to_string());
    configs.insert(ENABLE_RIPPLE_STACK.to_string(), "false".to_string());
    configs
}

/// The store document, also the export/import format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: String,
    pub clusters: Vec<Cluster>,
}

/// Partial update applied by the settings workflow
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterUpdate {
    pub name: Option<String>,
    pub configs: Option<BTreeMap<String, String>>,
    pub variables: Option<BTreeMap<String, String>>,
}

/// Persisted list of clusters
pub struct ClusterStore {
    path: PathBuf,
    clusters: Vec<Cluster>,
    closed: bool,
}

impl ClusterStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: &Path) -> Result<Self, String> {
        let clusters = match std::fs::read_to_string(path) {
            Ok(data) => {
                let doc: StoreDocument = serde_json::from_str(&data)
                    .map_err(|e| format!("Corrupt cluster store {}: {}", path.display(), e))?;
                if doc.version != STORE_VERSION {
                    warn!("Cluster store version {} differs from {}", doc.version, STORE_VERSION);
                }
                doc.clusters
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
        };
        info!("Loaded {} clusters from {}", clusters.len(), path.display());
        Ok(Self { path: path.to_path_buf(), clusters, closed: false })
    }

    /// Write the current state to disk and refuse further changes
    pub fn close(&mut self) -> Result<(), String> {
        self.closed = true;
        self.save(&self.clusters)
    }

    /// Persist `clusters`, then make them the current state
    fn commit(&mut self, clusters: Vec<Cluster>) -> Result<(), String> {
        if self.closed {
            return Err("Cluster store is closed".to_string());
        }
        self.save(&clusters)?;
        self.clusters = clusters;
        Ok(())
    }

    fn save(&self, clusters: &[Cluster]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        let doc = StoreDocument {
            version: STORE_VERSION.to_string(),
            clusters: clusters.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|e| e.to_string())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| format!("Failed to write cluster store: {}", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| format!("Failed to replace cluster store: {}", e))
    }

    pub fn list(&self) -> Vec<Cluster> {
        self.clusters.clone()
    }

    pub fn get(&self, id: &str) -> Option<Cluster> {
        self.clusters.iter().find(|c| c.id == id).cloned()
    }

    /// Create a cluster. At most one cluster per type may exist.
    pub fn create(
        &mut self,
        name: &str,
        cluster_type: ClusterType,
        configs: BTreeMap<String, String>,
        variables: BTreeMap<String, String>,
    ) -> Result<Cluster, String> {
        if name.trim().is_empty() {
            return Err("Cluster name is required".to_string());
        }
        if self.clusters.iter().any(|c| c.cluster_type == cluster_type) {
            return Err(format!("A {:?} cluster already exists", cluster_type));
        }
        let cluster = Cluster {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            cluster_type,
            configs,
            variables,
        };
        let mut clusters = self.clusters.clone();
        clusters.push(cluster.clone());
        self.commit(clusters)?;
        info!("Created {:?} cluster '{}' ({})", cluster.cluster_type, cluster.name, cluster.id);
        Ok(cluster)
    }

    /// Apply a settings update. The cluster type is immutable.
    pub fn update(&mut self, id: &str, update: ClusterUpdate) -> Result<Cluster, String> {
        let mut clusters = self.clusters.clone();
        let cluster = clusters.iter_mut().find(|c| c.id == id)
            .ok_or_else(|| format!("Cluster '{}' not found", id))?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err("Cluster name is required".to_string());
            }
            cluster.name = name.trim().to_string();
        }
        if let Some(configs) = update.configs {
            cluster.configs = configs;
        }
        if let Some(variables) = update.variables {
            cluster.variables = variables;
        }
        let updated = cluster.clone();
        self.commit(clusters)?;
        Ok(updated)
    }

    /// Remove a cluster. Returns false if it did not exist.
    pub fn remove(&mut self, id: &str) -> Result<bool, String> {
        if !self.clusters.iter().any(|c| c.id == id) {
            return Ok(false);
        }
        let clusters = self.clusters.iter().filter(|c| c.id != id).cloned().collect();
        self.commit(clusters)?;
        info!("Removed cluster {}", id);
        Ok(true)
    }

    pub fn export(&self) -> StoreDocument {
        StoreDocument {
            version: STORE_VERSION.to_string(),
            clusters: self.clusters.clone(),
        }
    }

    /// Replace all clusters with an imported document. Returns the ids that
    /// were dropped so their runtime state can be cleared.
    pub fn import(&mut self, doc: StoreDocument) -> Result<Vec<String>, String> {
        if doc.version != STORE_VERSION {
            return Err(format!(
                "Unsupported export version '{}' (expected '{}')",
                doc.version, STORE_VERSION
            ));
        }
        for (i, cluster) in doc.clusters.iter().enumerate() {
            if doc.clusters[..i].iter().any(|c| c.cluster_type == cluster.cluster_type) {
                return Err(format!("Import contains more than one {:?} cluster", cluster.cluster_type));
            }
            if doc.clusters[..i].iter().any(|c| c.id == cluster.id) {
                return Err(format!("Import contains duplicate cluster id {}", cluster.id));
            }
        }
        let dropped = self.clusters.iter()
            .filter(|old| !doc.clusters.iter().any(|c| c.id == old.id))
            .map(|c| c.id.clone())
            .collect();
        self.commit(doc.clusters)?;
        info!("Imported {} clusters", self.clusters.len());
        Ok(dropped)
    }
}
