//! Application settings — `settings.toml` in the data dir, plus the directories derived from it

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.toml";

fn default_check_concurrency() -> usize { 1 }
fn default_file_server_script() -> String { "file-server.sh".to_string() }
fn default_file_server_match() -> String { "http.server".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Shipped scripts and templates; auto-detected when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,
    /// Checks run at once within a status phase
    #[serde(default = "default_check_concurrency")]
    pub check_concurrency: usize,
    /// Base URL templates are fetched from when no local copy exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_base_url: Option<String>,
    /// File-server launcher under the scripts dir
    #[serde(default = "default_file_server_script")]
    pub file_server_script: String,
    /// Process-table filter identifying the server process the launcher execs.
    /// Only matches that also name the configs dir count.
    #[serde(default = "default_file_server_match")]
    pub file_server_match: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assets_dir: None,
            check_concurrency: default_check_concurrency(),
            template_base_url: None,
            file_server_script: default_file_server_script(),
            file_server_match: default_file_server_match(),
        }
    }
}

impl Settings {
    /// Load from `data_dir/settings.toml`; missing or unreadable files give defaults
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(data) => toml::from_str(&data).unwrap_or_else(|e| {
                warn!("Ignoring invalid {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), String> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| format!("Failed to create {}: {}", data_dir.display(), e))?;
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(data_dir.join(SETTINGS_FILE), content)
            .map_err(|e| format!("Failed to write settings: {}", e))
    }
}

/// Directories the core reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub assets_dir: PathBuf,
    /// Rendered `{cluster_id}-{template}.yaml` files
    pub configs_dir: PathBuf,
    pub store_file: PathBuf,
    pub scripts_dir: PathBuf,
    pub templates_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: &Path, assets_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            assets_dir: assets_dir.to_path_buf(),
            configs_dir: data_dir.join("configs"),
            store_file: data_dir.join("clusters.json"),
            scripts_dir: assets_dir.join("scripts"),
            templates_dir: assets_dir.join("templates"),
        }
    }

    /// Companion files copied next to rendered configs
    pub fn static_dir(&self) -> PathBuf {
        self.templates_dir.join("static")
    }
}

/// Default data dir: `$HOME/.control-center`
pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".control-center")
}

/// Find the assets directory
pub fn find_assets_dir() -> PathBuf {
    let candidates = [
        // Development
        "assets",
        // Installed
        "/opt/control-center/assets",
        "/usr/share/control-center/assets",
    ];

    for dir in &candidates {
        let path = Path::new(dir);
        if path.join("scripts").is_dir() {
            return path.to_path_buf();
        }
    }

    // Fallback
    PathBuf::from("assets")
}
