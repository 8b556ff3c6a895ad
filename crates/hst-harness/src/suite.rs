//! Behaviour shared by every topology suite.
//!
//! [`HstSuite`] owns the suite's slot, topology, containers and the running
//! case's log. Topology suites hold one and call into it from their
//! [`SuiteLifecycle`](crate::runner::SuiteLifecycle) hooks.

use std::sync::Arc;

use hst_netns::{NetInterface, Topology, TopologyError};
use tracing::info;

use crate::alloc::{ResourcePool, SuiteSlot};
use crate::assert::CaseLog;
use crate::config::HarnessConfig;
use crate::container::{Container, ContainerSet};
use crate::error::{HarnessError, HarnessResult};
use crate::stanza::Stanza;

pub const DRY_RUN_REASON: &str = "Dry run mode = true";

/// Log lines per file attached to a failing case.
const LOG_TAIL_LINES: usize = 50;

fn blocking_failed(topology: &str, e: tokio::task::JoinError) -> HarnessError {
    HarnessError::Topology(TopologyError::Build {
        topology: topology.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug)]
pub struct HstSuite {
    name: String,
    config: Arc<HarnessConfig>,
    pool: ResourcePool,
    slot: Option<SuiteSlot>,
    topology: Option<Topology>,
    containers: ContainerSet,
    case: CaseLog,
}

impl HstSuite {
    pub fn new(name: impl Into<String>, config: Arc<HarnessConfig>, pool: ResourcePool) -> Self {
        Self {
            name: name.into(),
            config,
            pool,
            slot: None,
            topology: None,
            containers: ContainerSet::default(),
            case: CaseLog::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Claim a slot and build the named topology for it. Simulated runs
    /// plan the topology without touching the host.
    ///
    /// Namespace creation shells out to `ip`, so it runs on the blocking
    /// pool. If setup is abandoned the built topology is dropped, which
    /// deletes it.
    pub async fn configure_network_topology(&mut self, name: &str) -> HarnessResult<()> {
        if self.topology.is_some() {
            return Err(HarnessError::Config(format!(
                "suite {} already has a topology",
                self.name
            )));
        }
        let slot = self.pool.claim_slot()?;
        let plan = Topology::plan(name, slot.slot())?;
        let topology = if self.config.simulate {
            plan.detached()
        } else {
            tokio::task::spawn_blocking(move || plan.materialize())
                .await
                .map_err(|e| blocking_failed(name, e))??
        };
        info!(suite = %self.name, topology = name, slot = slot.slot(), "network topology ready");
        self.slot = Some(slot);
        self.topology = Some(topology);
        Ok(())
    }

    /// Bind the named container topology to the suite's namespaces.
    pub fn load_container_topology(&mut self, name: &str) -> HarnessResult<()> {
        let dir = self.config.runtime_dir.join(&self.name);
        let containers = ContainerSet::load(name, self.topology()?, &dir)?;
        self.containers = containers;
        Ok(())
    }

    pub fn topology(&self) -> HarnessResult<&Topology> {
        self.topology
            .as_ref()
            .ok_or_else(|| HarnessError::Config(format!("suite {} has no topology", self.name)))
    }

    pub fn get_interface_by_name(&self, role: &str) -> HarnessResult<NetInterface> {
        Ok(self.topology()?.get_interface_by_name(role)?.clone())
    }

    pub fn get_container_by_name(&self, name: &str) -> HarnessResult<&Container> {
        self.containers.get_container_by_name(name)
    }

    pub fn get_container_by_name_mut(&mut self, name: &str) -> HarnessResult<&mut Container> {
        self.containers.get_container_by_name_mut(name)
    }

    /// Create `container`'s instance for this test from its CPU lease and
    /// `stanzas`.
    pub fn new_vpp_instance(&mut self, container: &str, stanzas: Vec<Stanza>) -> HarnessResult<()> {
        let c = self.containers.get_container_by_name_mut(container)?;
        c.new_vpp_instance(&self.config, stanzas)?;
        Ok(())
    }

    pub fn containers(&self) -> &ContainerSet {
        &self.containers
    }

    /// Next port from the suite's range.
    pub fn generate_port(&mut self) -> HarnessResult<u16> {
        self.slot
            .as_mut()
            .ok_or_else(|| HarnessError::Resource(format!("suite {} holds no slot", self.name)))?
            .generate_port()
    }

    /// Lease the configured number of cores to every container that is
    /// pinned, all in one step. Waits while other cases hold the cores.
    pub async fn allocate_container_cpus(&mut self) -> HarnessResult<()> {
        let n = self.config.resources.cpus_per_container;
        let pinned = self.containers.iter().filter(|c| c.needs_cpus()).count();
        let sets = self.pool.acquire_cpu_sets(&vec![n; pinned]).await?;
        for (c, cpus) in self
            .containers
            .iter_mut()
            .filter(|c| c.needs_cpus())
            .zip(sets)
        {
            c.assign_cpus(cpus);
        }
        Ok(())
    }

    pub fn case_log(&mut self) -> &mut CaseLog {
        &mut self.case
    }

    /// Log to both the tracing output and the case record.
    pub fn log(&mut self, text: impl Into<String>) {
        self.case.log(text);
    }

    pub fn assert_contains(&mut self, haystack: &str, needle: &str) -> bool {
        self.case.assert_contains(haystack, needle)
    }

    pub fn assert_not_contains(&mut self, haystack: &str, needle: &str) -> bool {
        self.case.assert_not_contains(haystack, needle)
    }

    pub fn assert_equal_within_threshold(&mut self, actual: f64, expected: f64, threshold: f64) -> bool {
        self.case.assert_equal_within_threshold(actual, expected, threshold)
    }

    pub fn assert_not_equal<T: PartialEq + std::fmt::Debug>(&mut self, actual: T, unexpected: T) -> bool {
        self.case.assert_not_equal(actual, unexpected)
    }

    pub fn assert_empty(&mut self, text: &str) -> bool {
        self.case.assert_empty(text)
    }

    /// Called at the end of per-case setup. In dry-run mode, logs where
    /// the containers can be reached and tells the runner to skip the body.
    pub fn dry_run_directive(&mut self) -> Option<String> {
        if !self.config.dry_run {
            return None;
        }
        self.containers.log_started();
        self.log(DRY_RUN_REASON);
        Some(DRY_RUN_REASON.to_string())
    }

    /// Stop every container and release their CPU leases.
    pub async fn teardown_test(&mut self) -> HarnessResult<()> {
        self.containers.stop_all().await;
        Ok(())
    }

    /// Append the tail of every instance's log to the case record.
    pub fn attach_diagnostics(&mut self) {
        let tails: Vec<String> = self
            .containers
            .iter()
            .filter_map(|c| c.instance().ok())
            .map(|i| i.log_tail(LOG_TAIL_LINES))
            .filter(|tail| !tail.is_empty())
            .collect();
        for tail in tails {
            self.case.attach(tail);
        }
    }

    /// Stop everything, remove the topology and return the slot.
    pub async fn teardown_suite(&mut self) -> HarnessResult<()> {
        self.containers.stop_all().await;
        self.containers = ContainerSet::default();
        if let Some(mut topology) = self.topology.take() {
            let name = topology.shape().name();
            if topology.is_live() {
                tokio::task::spawn_blocking(move || topology.teardown())
                    .await
                    .map_err(|e| blocking_failed(name, e))?;
            } else {
                topology.teardown();
            }
        }
        self.slot = None;
        info!(suite = %self.name, "suite torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resources;

    fn simulated() -> HstSuite {
        let config = HarnessConfig {
            simulate: true,
            ..HarnessConfig::default()
        };
        let pool = ResourcePool::with_cores(Resources::default(), (0..8).collect());
        HstSuite::new("VethsSuite", Arc::new(config), pool)
    }

    #[tokio::test]
    async fn suite_resources_are_returned_at_teardown() {
        let mut s = simulated();
        s.configure_network_topology("2peerVeth").await.unwrap();
        s.load_container_topology("2peerVeth").unwrap();
        let p1 = s.generate_port().unwrap();
        let p2 = s.generate_port().unwrap();
        assert_ne!(p1, p2);
        // Host-launched apps run unpinned: one slot plus the two vpp leases.
        s.allocate_container_cpus().await.unwrap();
        assert_eq!(s.pool().outstanding(), 3);

        s.teardown_test().await.unwrap();
        assert_eq!(s.pool().outstanding(), 1);
        s.teardown_suite().await.unwrap();
        assert_eq!(s.pool().outstanding(), 0);
        assert!(s.topology().is_err());
        s.teardown_suite().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_topology_is_fatal() {
        let mut s = simulated();
        let err = s.configure_network_topology("ring").await.unwrap_err();
        assert!(matches!(err, HarnessError::Topology(_)));
        assert!(s.load_container_topology("2peerVeth").is_err());
    }

    #[tokio::test]
    async fn interface_lookup_by_role() {
        let mut s = simulated();
        s.configure_network_topology("2peerVeth6").await.unwrap();
        let srv = s.get_interface_by_name("srv").unwrap();
        assert!(!srv.ip6_address_string().is_empty());
        assert!(s.get_interface_by_name("mgmt").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn live_topology_is_built_and_removed_off_the_runtime() {
        if !crate::test_util::check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }
        let pool = ResourcePool::with_cores(Resources::default(), vec![0]);
        let mut s = HstSuite::new("VethsSuite", Arc::new(HarnessConfig::default()), pool);
        s.configure_network_topology("2peerVeth").await.unwrap();
        let names = s.topology().unwrap().namespace_names();
        assert!(s.topology().unwrap().is_live());
        assert!(hst_netns::namespace::namespace_exists(&names[0]));

        s.teardown_suite().await.unwrap();
        for name in &names {
            assert!(!hst_netns::namespace::namespace_exists(name));
        }
        assert_eq!(s.pool().outstanding(), 0);
    }

    #[test]
    fn dry_run_directive_only_in_dry_run() {
        let mut s = simulated();
        assert_eq!(s.dry_run_directive(), None);

        let config = HarnessConfig {
            simulate: true,
            dry_run: true,
            ..HarnessConfig::default()
        };
        let pool = ResourcePool::with_cores(Resources::default(), vec![0]);
        let mut s = HstSuite::new("VethsSuite", Arc::new(config), pool);
        assert_eq!(s.dry_run_directive().as_deref(), Some(DRY_RUN_REASON));
    }
}
