//! Status checker — the three-phase readiness run for a cluster
//!
//! Idle -> CheckingSystem -> CheckingApps -> CheckingEngine -> Done
//!
//! Every applicable descriptor is first published as `Checking`, then moves to
//! exactly one terminal status. Failures are data, never errors: one failing
//! check must not stop the rest. The engine phase only executes commands when
//! every mandatory app check passed.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::events::EventHub;
use crate::monitoring::HostInfo;
use crate::registry::{self, CheckCategory, CheckDescriptor, CheckSource, HostProbe, SysRequirement};
use crate::shell::ShellExecutor;
use crate::strategy::strategy_for;

/// Detail given to engine checks skipped because prerequisites failed
pub const REQUIRED_APPS_NOT_CONFIGURED: &str = "Required apps are not configured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Checking,
    Configured,
    NotConfigured,
    Pending,
}

impl CheckStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckStatus::Checking)
    }
}

/// Outcome of one descriptor in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub display_name: String,
    pub detail: String,
    pub status: CheckStatus,
}

impl CheckResult {
    fn of(descriptor: &CheckDescriptor, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            id: descriptor.id.clone(),
            display_name: descriptor.display_name.clone(),
            detail: detail.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    Idle,
    CheckingSystem,
    CheckingApps,
    CheckingEngine,
    Done,
}

/// What a finished run concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub system_ready: bool,
    pub mandatory_satisfied: bool,
    pub engine_ready: bool,
    /// Terminal results published, one per applicable descriptor
    pub results: usize,
}

pub struct StatusChecker {
    shell: Arc<dyn ShellExecutor>,
    hub: Arc<EventHub>,
    concurrency: usize,
}

impl StatusChecker {
    /// `concurrency` bounds how many checks of one phase run at once (1 = sequential)
    pub fn new(shell: Arc<dyn ShellExecutor>, hub: Arc<EventHub>, concurrency: usize) -> Self {
        Self { shell, hub, concurrency: concurrency.max(1) }
    }

    /// Run all three phases for a cluster, streaming results through the hub
    pub async fn check(&self, cluster: &Cluster, host: &HostInfo) -> StatusSummary {
        let id = cluster.id.as_str();
        let strategy = strategy_for(cluster.cluster_type);
        let system = registry::system_checks();
        let apps = registry::application_checks(strategy, host.os);
        let engine = registry::engine_checks(strategy, host.os);

        info!("Checking {} cluster '{}' ({})", strategy.display_name(), cluster.name, id);
        self.hub.phase(id, CheckPhase::Idle);
        for (category, list) in [
            (CheckCategory::System, &system),
            (CheckCategory::Apps, &apps),
            (CheckCategory::Engine, &engine),
        ] {
            for descriptor in list {
                self.hub.status(id, category, &CheckResult::of(descriptor, CheckStatus::Checking, ""));
            }
        }

        self.hub.phase(id, CheckPhase::CheckingSystem);
        let requirement = strategy.requirement_for(host.os);
        let system_results: Vec<CheckResult> = system.iter()
            .map(|d| {
                let result = evaluate_system(d, host, requirement);
                self.hub.log(id, &d.display_name, &result.detail);
                self.hub.status(id, CheckCategory::System, &result);
                result
            })
            .collect();
        let system_ready = system_results.iter().all(|r| r.status == CheckStatus::Configured);

        self.hub.phase(id, CheckPhase::CheckingApps);
        let app_results: Vec<CheckResult> = stream::iter(apps.iter().map(|d| self.check_app(id, d)).collect::<Vec<_>>())
            .buffered(self.concurrency)
            .collect()
            .await;
        let mandatory_satisfied = apps.iter().zip(&app_results)
            .filter(|(d, _)| !d.optional && d.check_command().is_some())
            .all(|(_, r)| r.status == CheckStatus::Configured);
        debug!("Cluster {} mandatory apps satisfied: {}", id, mandatory_satisfied);

        self.hub.phase(id, CheckPhase::CheckingEngine);
        let engine_results: Vec<CheckResult> = if mandatory_satisfied {
            stream::iter(engine.iter().map(|d| self.check_engine(id, d)).collect::<Vec<_>>())
                .buffered(self.concurrency)
                .collect()
                .await
        } else {
            engine.iter()
                .map(|d| {
                    let result = CheckResult::of(d, CheckStatus::NotConfigured, REQUIRED_APPS_NOT_CONFIGURED);
                    self.hub.status(id, CheckCategory::Engine, &result);
                    result
                })
                .collect()
        };
        let engine_ready = engine.iter().zip(&engine_results)
            .filter(|(d, _)| !d.optional)
            .all(|(_, r)| r.status == CheckStatus::Configured);

        self.hub.phase(id, CheckPhase::Done);
        let summary = StatusSummary {
            system_ready,
            mandatory_satisfied,
            engine_ready,
            results: system_results.len() + app_results.len() + engine_results.len(),
        };
        info!(
            "Cluster '{}' status: system={} apps={} engine={}",
            cluster.name, summary.system_ready, summary.mandatory_satisfied, summary.engine_ready
        );
        summary
    }

    async fn check_app(&self, cluster_id: &str, descriptor: &CheckDescriptor) -> CheckResult {
        let result = match descriptor.check_command() {
            None => CheckResult::of(descriptor, CheckStatus::Pending, ""),
            Some(command) => {
                let (stdout, stderr) = self.run_logged(cluster_id, descriptor, command).await;
                if stderr.is_empty() {
                    CheckResult::of(descriptor, CheckStatus::Configured, stdout)
                } else {
                    CheckResult::of(descriptor, CheckStatus::NotConfigured, stderr)
                }
            }
        };
        self.hub.status(cluster_id, CheckCategory::Apps, &result);
        result
    }

    async fn check_engine(&self, cluster_id: &str, descriptor: &CheckDescriptor) -> CheckResult {
        let result = match descriptor.check_command() {
            None => CheckResult::of(descriptor, CheckStatus::Pending, ""),
            Some(command) => {
                let (stdout, stderr) = self.run_logged(cluster_id, descriptor, command).await;
                if !stderr.is_empty() {
                    CheckResult::of(descriptor, CheckStatus::NotConfigured, stderr)
                } else {
                    let raw = if stdout.is_empty() { "0" } else { stdout.as_str() };
                    let status = match raw.parse::<i64>() {
                        Ok(n) if n > 0 => CheckStatus::Configured,
                        _ => CheckStatus::NotConfigured,
                    };
                    CheckResult::of(descriptor, status, format!("Ready Instances: {}", raw))
                }
            }
        };
        self.hub.status(cluster_id, CheckCategory::Engine, &result);
        result
    }

    /// Run a check command, log non-empty output, return trimmed (stdout, stderr).
    /// A spawn failure counts as stderr.
    async fn run_logged(&self, cluster_id: &str, descriptor: &CheckDescriptor, command: &str) -> (String, String) {
        let output = self.shell.run(command).await;
        let stdout = output.stdout.trim().to_string();
        let mut stderr = output.stderr.trim().to_string();
        if stderr.is_empty() {
            if let Some(err) = output.exit_error {
                stderr = err;
            }
        }
        if !stdout.is_empty() {
            self.hub.log(cluster_id, &descriptor.display_name, &stdout);
        }
        if !stderr.is_empty() {
            self.hub.log(cluster_id, &descriptor.display_name, &stderr);
        }
        (stdout, stderr)
    }
}

/// Compare a host fact against the requirement row for this OS
fn evaluate_system(
    descriptor: &CheckDescriptor,
    host: &HostInfo,
    requirement: Option<SysRequirement>,
) -> CheckResult {
    let CheckSource::Introspected(probe) = descriptor.source else {
        return CheckResult::of(descriptor, CheckStatus::Pending, "");
    };
    let detail = match probe {
        HostProbe::Os => host.os_version.clone(),
        HostProbe::Cpu => format!("{} cores", host.cpu_count),
        HostProbe::Memory => format!("{:.1} GB", host.memory_total_gb()),
    };
    let Some(req) = requirement else {
        return CheckResult::of(descriptor, CheckStatus::Pending, detail);
    };
    let ok = match probe {
        HostProbe::Os => req.os == host.os,
        HostProbe::Cpu => host.cpu_count >= req.min_cpu,
        // Installed RAM reports slightly under its nominal size
        HostProbe::Memory => host.memory_total_gb().round() >= req.min_memory_gb as f64,
    };
    let status = if ok { CheckStatus::Configured } else { CheckStatus::NotConfigured };
    CheckResult::of(descriptor, status, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterType;
    use crate::events::{ClusterEvent, StatusBoard};
    use crate::monitoring::HostOs;
    use crate::shell::ShellOutput;
    use crate::shell::fake::FakeShell;
    use std::collections::{BTreeMap, HashMap};

    const GB: u64 = 1024 * 1024 * 1024;

    fn host(os: HostOs, cpus: usize, memory: u64) -> HostInfo {
        HostInfo {
            hostname: "devbox".into(),
            os,
            os_version: "Ubuntu 24.04".into(),
            cpu_count: cpus,
            cpu_model: "Test CPU".into(),
            memory_total_bytes: memory,
        }
    }

    fn cluster(cluster_type: ClusterType) -> Cluster {
        Cluster {
            id: "c-1".into(),
            name: "dev".into(),
            cluster_type,
            configs: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    fn healthy(shell: FakeShell) -> FakeShell {
        shell.on("version", ShellOutput::ok("v1.0.0")).on("jsonpath", ShellOutput::ok("1"))
    }

    async fn run(shell: FakeShell, os: HostOs, concurrency: usize) -> (StatusSummary, StatusBoard, Arc<FakeShell>) {
        let shell = Arc::new(shell);
        let hub = Arc::new(EventHub::new());
        let checker = StatusChecker::new(shell.clone(), hub.clone(), concurrency);
        let summary = checker.check(&cluster(ClusterType::Minikube), &host(os, 8, 16 * GB)).await;
        (summary, hub.board("c-1"), shell)
    }

    fn find<'a>(results: &'a [CheckResult], id: &str) -> &'a CheckResult {
        results.iter().find(|r| r.id == id).unwrap()
    }

    #[tokio::test]
    async fn docker_version_on_stdout_is_configured() {
        let shell = healthy(FakeShell::new().on("docker --version", ShellOutput::ok("Docker version 24.0\n")));
        let (summary, board, _) = run(shell, HostOs::Linux, 1).await;

        assert_eq!(
            find(&board.apps, "docker"),
            &CheckResult {
                id: "docker".into(),
                display_name: "Docker".into(),
                detail: "Docker version 24.0".into(),
                status: CheckStatus::Configured,
            }
        );
        assert!(summary.system_ready);
        assert!(summary.mandatory_satisfied);
        assert!(summary.engine_ready);
    }

    #[tokio::test]
    async fn mandatory_failure_skips_engine_commands() {
        let shell = healthy(FakeShell::new().on("docker --version", ShellOutput::err("docker: command not found")));
        let (summary, board, shell) = run(shell, HostOs::Linux, 1).await;

        let docker = find(&board.apps, "docker");
        assert_eq!(docker.status, CheckStatus::NotConfigured);
        assert_eq!(docker.detail, "docker: command not found");
        assert!(!summary.mandatory_satisfied);

        // every other app was still attempted
        assert!(shell.calls().iter().any(|c| c == "helm version"));
        assert!(!shell.calls().iter().any(|c| c.contains("jsonpath")));
        assert!(!board.engine.is_empty());
        for result in &board.engine {
            assert_eq!(result.status, CheckStatus::NotConfigured);
            assert_eq!(result.detail, REQUIRED_APPS_NOT_CONFIGURED);
        }
    }

    #[tokio::test]
    async fn optional_failure_does_not_gate_engine() {
        let shell = healthy(FakeShell::new().on("ffmpeg", ShellOutput::err("ffmpeg: not found")));
        let (summary, board, shell) = run(shell, HostOs::Linux, 1).await;

        assert_eq!(find(&board.apps, "ffmpeg").status, CheckStatus::NotConfigured);
        assert!(summary.mandatory_satisfied);
        assert!(shell.calls().iter().any(|c| c.contains("jsonpath")));
    }

    #[tokio::test]
    async fn engine_ready_instances() {
        let shell = healthy(
            FakeShell::new()
                .on("local-engine-client", ShellOutput::ok("0"))
                .on("local-engine-api", ShellOutput::ok("2"))
                .on("local-engine-instanceserver", ShellOutput::ok(""))
                .on("local-mariadb", ShellOutput::err("Error from server (NotFound)")),
        );
        let (summary, board, _) = run(shell, HostOs::Linux, 1).await;

        let client = find(&board.engine, "client");
        assert_eq!((client.status, client.detail.as_str()), (CheckStatus::NotConfigured, "Ready Instances: 0"));
        let api = find(&board.engine, "api");
        assert_eq!((api.status, api.detail.as_str()), (CheckStatus::Configured, "Ready Instances: 2"));
        let instanceserver = find(&board.engine, "instanceserver");
        assert_eq!(instanceserver.detail, "Ready Instances: 0");
        let mariadb = find(&board.engine, "mariadb");
        assert_eq!((mariadb.status, mariadb.detail.as_str()), (CheckStatus::NotConfigured, "Error from server (NotFound)"));
        assert!(!summary.engine_ready);
    }

    #[tokio::test]
    async fn spawn_failure_counts_as_not_configured() {
        // FakeShell answers unknown commands with an exit_error
        let shell = FakeShell::new().on("version", ShellOutput::ok("v1"));
        let (summary, board, _) = run(shell, HostOs::Linux, 1).await;
        assert!(summary.mandatory_satisfied);
        assert!(board.engine.iter().all(|r| r.status == CheckStatus::NotConfigured));
        assert!(board.engine[0].detail.contains("no fake response"));
    }

    #[tokio::test]
    async fn exactly_one_terminal_result_per_descriptor() {
        let shell = Arc::new(healthy(FakeShell::new()));
        let hub = Arc::new(EventHub::new());
        let mut rx = hub.subscribe();
        let checker = StatusChecker::new(shell, hub.clone(), 3);
        let host = host(HostOs::Linux, 8, 16 * GB);
        let summary = checker.check(&cluster(ClusterType::MicroK8s), &host).await;

        let strategy = strategy_for(ClusterType::MicroK8s);
        let expected = registry::system_checks().len()
            + registry::application_checks(strategy, HostOs::Linux).len()
            + registry::engine_checks(strategy, HostOs::Linux).len();
        assert_eq!(summary.results, expected);

        let mut checking: HashMap<(CheckCategory, String), usize> = HashMap::new();
        let mut terminal: HashMap<(CheckCategory, String), usize> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            if let ClusterEvent::Status { category, result, .. } = event {
                let counter = if result.status.is_terminal() { &mut terminal } else { &mut checking };
                *counter.entry((category, result.id)).or_default() += 1;
            }
        }
        assert_eq!(terminal.len(), expected);
        assert!(terminal.values().all(|n| *n == 1));
        assert_eq!(checking.len(), expected);
    }

    #[tokio::test]
    async fn missing_requirement_row_leaves_system_pending() {
        let shell = healthy(FakeShell::new());
        let (summary, board, _) = run(shell, HostOs::Windows, 1).await;
        assert!(!summary.system_ready);
        assert!(board.system.iter().all(|r| r.status == CheckStatus::Pending));
        assert_eq!(find(&board.system, "cpu").detail, "8 cores");
    }

    #[tokio::test]
    async fn undersized_host_fails_thresholds() {
        let shell = Arc::new(healthy(FakeShell::new()));
        let hub = Arc::new(EventHub::new());
        let checker = StatusChecker::new(shell, hub.clone(), 1);
        let summary = checker.check(&cluster(ClusterType::Minikube), &host(HostOs::Linux, 2, 8 * GB)).await;

        let board = hub.board("c-1");
        assert!(!summary.system_ready);
        assert_eq!(find(&board.system, "os").status, CheckStatus::Configured);
        assert_eq!(find(&board.system, "cpu").status, CheckStatus::NotConfigured);
        assert_eq!(find(&board.system, "memory").status, CheckStatus::NotConfigured);
        assert_eq!(find(&board.system, "memory").detail, "8.0 GB");
        assert!(hub.logs("c-1").iter().any(|l| l.category == "Memory" && l.message == "8.0 GB"));
    }

    #[tokio::test]
    async fn parallel_checks_match_sequential() {
        let build = || healthy(FakeShell::new().on("helm version", ShellOutput::err("helm: not found")));
        let (seq, seq_board, _) = run(build(), HostOs::Linux, 1).await;
        let (par, par_board, _) = run(build(), HostOs::Linux, 8).await;
        assert_eq!(seq, par);
        assert_eq!(seq_board.apps, par_board.apps);
        assert_eq!(seq_board.engine, par_board.engine);
        assert_eq!(par_board.phase, Some(CheckPhase::Done));
    }
}
