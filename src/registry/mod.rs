//! Registry — the static descriptors for every status check
//!
//! Pure data: each call builds fresh, ordered lists for one category, already
//! filtered to what applies on this host OS and cluster type.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterType;
use crate::monitoring::HostOs;
use crate::strategy::ClusterTypeStrategy;

/// Which phase of a status run a check belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    System,
    Apps,
    Engine,
}

/// Host fact a system check reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostProbe {
    Os,
    Cpu,
    Memory,
}

/// How a check obtains its verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CheckSource {
    /// Derived from host introspection, no process spawned
    Introspected(HostProbe),
    /// Shell command whose output is classified
    Command(String),
    /// Informational only; stays pending
    Unprobed,
}

/// OS / cluster type filter. Empty lists match everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applicability {
    pub os: &'static [HostOs],
    pub cluster_types: &'static [ClusterType],
}

impl Applicability {
    pub const ANY: Applicability = Applicability { os: &[], cluster_types: &[] };

    pub const fn os(os: &'static [HostOs]) -> Self {
        Applicability { os, cluster_types: &[] }
    }

    pub fn allows(&self, os: HostOs, cluster_type: ClusterType) -> bool {
        (self.os.is_empty() || self.os.contains(&os))
            && (self.cluster_types.is_empty() || self.cluster_types.contains(&cluster_type))
    }
}

/// Immutable definition of one health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDescriptor {
    pub id: String,
    pub display_name: String,
    pub source: CheckSource,
    /// A failing optional check does not block the engine phase
    pub optional: bool,
    pub applies_to: Applicability,
}

impl CheckDescriptor {
    pub fn command(id: &str, display_name: &str, command: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            source: CheckSource::Command(command.to_string()),
            optional: false,
            applies_to: Applicability::ANY,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn only(mut self, applies_to: Applicability) -> Self {
        self.applies_to = applies_to;
        self
    }

    pub fn check_command(&self) -> Option<&str> {
        match &self.source {
            CheckSource::Command(cmd) => Some(cmd),
            _ => None,
        }
    }
}

/// Minimum host resources for running a cluster type on one OS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SysRequirement {
    pub os: HostOs,
    pub min_cpu: usize,
    pub min_memory_gb: u64,
}

const UNIX: &[HostOs] = &[HostOs::Linux, HostOs::MacOs];

/// Host facts: OS, CPU count, memory
pub fn system_checks() -> Vec<CheckDescriptor> {
    [
        ("os", "Operating System", HostProbe::Os),
        ("cpu", "CPU Cores", HostProbe::Cpu),
        ("memory", "Memory", HostProbe::Memory),
    ]
    .into_iter()
    .map(|(id, name, probe)| CheckDescriptor {
        id: id.to_string(),
        display_name: name.to_string(),
        source: CheckSource::Introspected(probe),
        optional: false,
        applies_to: Applicability::ANY,
    })
    .collect()
}

/// Tooling every cluster type needs
fn common_application_checks() -> Vec<CheckDescriptor> {
    vec![
        CheckDescriptor::command("git", "Git", "git --version"),
        CheckDescriptor::command("node", "Node.js", "node --version"),
        CheckDescriptor::command("npm", "npm", "npm --version"),
        CheckDescriptor::command("python", "Python", "python3 --version").only(Applicability::os(UNIX)),
        CheckDescriptor::command("python", "Python", "python --version")
            .only(Applicability::os(&[HostOs::Windows])),
        CheckDescriptor::command("make", "Make", "make --version").only(Applicability::os(UNIX)),
        CheckDescriptor::command("docker", "Docker", "docker --version"),
        CheckDescriptor::command("kubectl", "kubectl", "kubectl version --client"),
        CheckDescriptor::command("helm", "Helm", "helm version"),
        CheckDescriptor::command("ffmpeg", "FFmpeg", "ffmpeg -version").optional(),
    ]
}

/// Prerequisite applications for a cluster type, in display order
pub fn application_checks(strategy: &dyn ClusterTypeStrategy, os: HostOs) -> Vec<CheckDescriptor> {
    common_application_checks()
        .into_iter()
        .chain(strategy.application_checks())
        .filter(|d| d.applies_to.allows(os, strategy.cluster_type()))
        .collect()
}

/// Release the engine chart is installed under
pub const ENGINE_RELEASE: &str = "local";

fn ready_replicas(kubectl: &str, kind: &str, name: &str, field: &str) -> String {
    format!("{} get {} {} -o jsonpath='{{.status.{}}}'", kubectl, kind, name, field)
}

/// Engine services, checked by ready replica count
pub fn engine_checks(strategy: &dyn ClusterTypeStrategy, os: HostOs) -> Vec<CheckDescriptor> {
    let kubectl = strategy.kubectl();
    let statefulset = |id: &str, name: &str, object: &str| {
        CheckDescriptor::command(id, name, &ready_replicas(kubectl, "statefulset", object, "readyReplicas"))
    };
    let deployment = |id: &str, name: &str, service: &str| {
        let object = format!("{}-engine-{}", ENGINE_RELEASE, service);
        CheckDescriptor::command(id, name, &ready_replicas(kubectl, "deployment", &object, "availableReplicas"))
    };
    vec![
        statefulset("mariadb", "MariaDB", &format!("{}-mariadb", ENGINE_RELEASE)),
        statefulset("redis", "Redis", &format!("{}-redis-master", ENGINE_RELEASE)),
        deployment("client", "Engine Client", "client"),
        deployment("api", "Engine API", "api"),
        deployment("instanceserver", "Instance Server", "instanceserver"),
        deployment("taskserver", "Task Server", "taskserver").optional(),
    ]
    .into_iter()
    .filter(|d| d.applies_to.allows(os, strategy.cluster_type()))
    .collect()
}
