//! Cluster type strategies — everything Minikube and MicroK8s do differently
//!
//! The status checker and orchestrator only ever dispatch through
//! `ClusterTypeStrategy`; adding a cluster type means adding one impl here.

use crate::cluster::ClusterType;
use crate::monitoring::HostOs;
use crate::registry::{Applicability, CheckDescriptor, SysRequirement};

/// A values template the configure workflow renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    /// Rendered as `{cluster_id}-{name}.yaml`
    pub name: &'static str,
    /// Shipped copy under the templates dir, also the remote file name
    pub file: &'static str,
    /// Location inside the engine source checkout
    pub repo_path: &'static str,
}

pub trait ClusterTypeStrategy: Send + Sync {
    fn cluster_type(&self) -> ClusterType;

    fn display_name(&self) -> &'static str;

    /// Resource minimums per OS. No row for the host OS means system checks stay pending.
    fn sys_requirements(&self) -> &'static [SysRequirement];

    /// Prerequisites beyond the common tooling
    fn application_checks(&self) -> Vec<CheckDescriptor>;

    /// kubectl invocation that talks to this cluster
    fn kubectl(&self) -> &'static str;

    /// Provisioning script under the scripts dir
    fn provisioning_script(&self) -> &'static str;

    /// Primary engine values template
    fn engine_template(&self) -> TemplateSpec;

    /// Long-running command exposing the Kubernetes dashboard
    fn dashboard_command(&self) -> &'static str;

    /// Command reclaiming disk from unused images
    fn prune_command(&self) -> &'static str;

    fn requirement_for(&self, os: HostOs) -> Option<SysRequirement> {
        self.sys_requirements().iter().find(|r| r.os == os).copied()
    }
}

pub struct Minikube;

impl ClusterTypeStrategy for Minikube {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Minikube
    }

    fn display_name(&self) -> &'static str {
        "Minikube"
    }

    fn sys_requirements(&self) -> &'static [SysRequirement] {
        &[
            SysRequirement { os: HostOs::Linux, min_cpu: 4, min_memory_gb: 16 },
            SysRequirement { os: HostOs::MacOs, min_cpu: 4, min_memory_gb: 16 },
        ]
    }

    fn application_checks(&self) -> Vec<CheckDescriptor> {
        let only = Applicability { os: &[], cluster_types: &[ClusterType::Minikube] };
        vec![
            CheckDescriptor::command("minikube", "Minikube", "minikube version").only(only),
            CheckDescriptor::command("virtualbox", "VirtualBox", "VBoxManage --version")
                .optional()
                .only(only),
        ]
    }

    fn kubectl(&self) -> &'static str {
        "kubectl"
    }

    fn provisioning_script(&self) -> &'static str {
        "configure-minikube.sh"
    }

    fn engine_template(&self) -> TemplateSpec {
        TemplateSpec {
            name: "values",
            file: "local.minikube.template.values.yaml",
            repo_path: "packages/ops/configs/local.minikube.template.values.yaml",
        }
    }

    fn dashboard_command(&self) -> &'static str {
        "minikube dashboard --url"
    }

    fn prune_command(&self) -> &'static str {
        "minikube ssh -- docker system prune -af"
    }
}

pub struct MicroK8s;

impl ClusterTypeStrategy for MicroK8s {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::MicroK8s
    }

    fn display_name(&self) -> &'static str {
        "MicroK8s"
    }

    fn sys_requirements(&self) -> &'static [SysRequirement] {
        &[
            SysRequirement { os: HostOs::Linux, min_cpu: 4, min_memory_gb: 16 },
            SysRequirement { os: HostOs::Windows, min_cpu: 4, min_memory_gb: 16 },
        ]
    }

    fn application_checks(&self) -> Vec<CheckDescriptor> {
        let only = Applicability { os: &[], cluster_types: &[ClusterType::MicroK8s] };
        vec![
            CheckDescriptor::command("microk8s", "MicroK8s", "microk8s version").only(only),
            CheckDescriptor::command("microk8s-status", "MicroK8s Status", "microk8s status --wait-ready --timeout 15")
                .optional()
                .only(only),
        ]
    }

    fn kubectl(&self) -> &'static str {
        "microk8s kubectl"
    }

    fn provisioning_script(&self) -> &'static str {
        "configure-microk8s.sh"
    }

    fn engine_template(&self) -> TemplateSpec {
        TemplateSpec {
            name: "values",
            file: "local.microk8s.template.values.yaml",
            repo_path: "packages/ops/configs/local.microk8s.template.values.yaml",
        }
    }

    fn dashboard_command(&self) -> &'static str {
        "microk8s dashboard-proxy"
    }

    fn prune_command(&self) -> &'static str {
        "docker system prune -af"
    }
}

/// Resolve the strategy for a cluster type
pub fn strategy_for(cluster_type: ClusterType) -> &'static dyn ClusterTypeStrategy {
    match cluster_type {
        ClusterType::Minikube => &Minikube,
        ClusterType::MicroK8s => &MicroK8s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_report_their_own_type() {
        for cluster_type in ClusterType::all() {
            assert_eq!(strategy_for(*cluster_type).cluster_type(), *cluster_type);
        }
    }

    #[test]
    fn requirement_lookup_by_os() {
        let minikube = strategy_for(ClusterType::Minikube);
        assert_eq!(minikube.requirement_for(HostOs::Linux).map(|r| r.min_cpu), Some(4));
        assert!(minikube.requirement_for(HostOs::Windows).is_none());
        assert!(strategy_for(ClusterType::MicroK8s).requirement_for(HostOs::Windows).is_some());
    }

    #[test]
    fn scripts_and_templates_differ_per_type() {
        let a = strategy_for(ClusterType::Minikube);
        let b = strategy_for(ClusterType::MicroK8s);
        assert_ne!(a.provisioning_script(), b.provisioning_script());
        assert_ne!(a.engine_template().file, b.engine_template().file);
        assert_eq!(a.engine_template().name, b.engine_template().name);
    }
}
