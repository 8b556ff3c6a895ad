//! Two-peer veth suites.
//!
//! A server VPP and a client VPP, each attached through af_packet to one
//! end of a veth pair, plus an app container per side. IPv4 and IPv6
//! variants share one implementation and keep separate registries.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use hst_netns::{NetInterface, TopologyShape};

use crate::alloc::ResourcePool;
use crate::assert::CaseLog;
use crate::config::HarnessConfig;
use crate::container::Container;
use crate::error::{HarnessError, HarnessResult};
use crate::instance::VppInstance;
use crate::runner::{CaseDirective, SuiteLifecycle};
use crate::stanza::Stanza;
use crate::suite::HstSuite;

pub const SERVER_VPP: &str = "server-vpp";
pub const CLIENT_VPP: &str = "client-vpp";
pub const SERVER_APP: &str = "server-app";
pub const CLIENT_APP: &str = "client-app";

/// Case names containing this run with private rx message queues.
pub const INTERRUPT_MODE: &str = "InterruptMode";

#[derive(Debug)]
pub struct VethsSuite {
    pub hst: HstSuite,
    shape: TopologyShape,
    server: Option<NetInterface>,
    client: Option<NetInterface>,
    pub port1: u16,
    pub port2: u16,
}

impl VethsSuite {
    /// IPv4 suite over `2peerVeth`.
    pub fn new(config: Arc<HarnessConfig>, pool: ResourcePool) -> Self {
        Self::with_shape("VethsSuite", TopologyShape::TwoPeerVeth, config, pool)
    }

    /// IPv6 suite over `2peerVeth6`.
    pub fn ipv6(config: Arc<HarnessConfig>, pool: ResourcePool) -> Self {
        Self::with_shape("Veths6Suite", TopologyShape::TwoPeerVeth6, config, pool)
    }

    fn with_shape(
        name: &str,
        shape: TopologyShape,
        config: Arc<HarnessConfig>,
        pool: ResourcePool,
    ) -> Self {
        Self {
            hst: HstSuite::new(name, config, pool),
            shape,
            server: None,
            client: None,
            port1: 0,
            port2: 0,
        }
    }

    pub fn shape(&self) -> TopologyShape {
        self.shape
    }

    pub fn server(&self) -> HarnessResult<&NetInterface> {
        self.server
            .as_ref()
            .ok_or_else(|| HarnessError::Config("suite not set up".into()))
    }

    pub fn client(&self) -> HarnessResult<&NetInterface> {
        self.client
            .as_ref()
            .ok_or_else(|| HarnessError::Config("suite not set up".into()))
    }

    pub fn server_vpp(&self) -> HarnessResult<&VppInstance> {
        self.hst.get_container_by_name(SERVER_VPP)?.instance()
    }

    pub fn client_vpp(&self) -> HarnessResult<&VppInstance> {
        self.hst.get_container_by_name(CLIENT_VPP)?.instance()
    }

    pub fn server_app(&self) -> HarnessResult<&Container> {
        self.hst.get_container_by_name(SERVER_APP)
    }

    pub fn client_app(&self) -> HarnessResult<&Container> {
        self.hst.get_container_by_name(CLIENT_APP)
    }

    async fn setup_suite_inner(&mut self) -> HarnessResult<()> {
        self.hst.configure_network_topology(self.shape.name()).await?;
        self.hst.load_container_topology(self.shape.name())?;
        self.server = Some(self.hst.get_interface_by_name("srv")?);
        self.client = Some(self.hst.get_interface_by_name("cln")?);
        self.port1 = self.hst.generate_port()?;
        self.port2 = self.hst.generate_port()?;
        Ok(())
    }

    async fn setup_test_inner(&mut self, case: &str) -> HarnessResult<CaseDirective> {
        self.hst.allocate_container_cpus().await?;

        let interrupt = case.contains(INTERRUPT_MODE);
        if interrupt {
            self.hst.log("**********************INTERRUPT MODE**********************");
        }
        let session = session_stanza(interrupt);
        self.hst.new_vpp_instance(SERVER_VPP, vec![session.clone()])?;
        self.hst
            .new_vpp_instance(CLIENT_VPP, vec![session, http_stanza()])?;

        let server = self.server()?.clone();
        let client = self.client()?.clone();
        self.start_vpp(SERVER_VPP, &server).await?;
        self.start_vpp(CLIENT_VPP, &client).await?;
        for app in [SERVER_APP, CLIENT_APP] {
            self.hst.get_container_by_name_mut(app)?.start().await?;
        }

        match self.hst.dry_run_directive() {
            Some(reason) => Ok(CaseDirective::Skip(reason)),
            None => Ok(CaseDirective::Run),
        }
    }

    async fn start_vpp(&mut self, container: &str, iface: &NetInterface) -> HarnessResult<()> {
        let c = self.hst.get_container_by_name_mut(container)?;
        c.start().await?;
        let index = c.instance_mut()?.create_af_packet(iface, false).await?;
        self.hst
            .log(format!("{container}: {} bound as index {index}", iface.name()));
        Ok(())
    }
}

/// `session { enable use-app-socket-api [use-private-rx-mqs] }`
pub fn session_stanza(interrupt_mode: bool) -> Stanza {
    let mut s = Stanza::new();
    s.new_stanza("session")
        .append("enable")
        .append("use-app-socket-api");
    if interrupt_mode {
        s.append("use-private-rx-mqs");
    }
    s.close();
    s
}

/// Header list limit for the http/2 continuation frame tests.
pub fn http_stanza() -> Stanza {
    let mut s = Stanza::new();
    s.new_stanza("http")
        .new_stanza("http2")
        .append("max-header-list-size 65536")
        .close()
        .close();
    s
}

impl SuiteLifecycle for VethsSuite {
    fn name(&self) -> &str {
        self.hst.name()
    }

    fn setup_suite(&mut self) -> BoxFuture<'_, HarnessResult<()>> {
        self.setup_suite_inner().boxed()
    }

    fn setup_test<'a>(&'a mut self, case: &'a str) -> BoxFuture<'a, HarnessResult<CaseDirective>> {
        self.setup_test_inner(case).boxed()
    }

    fn teardown_test(&mut self) -> BoxFuture<'_, HarnessResult<()>> {
        self.hst.teardown_test().boxed()
    }

    fn teardown_suite(&mut self) -> BoxFuture<'_, HarnessResult<()>> {
        self.server = None;
        self.client = None;
        self.hst.teardown_suite().boxed()
    }

    fn case_log(&mut self) -> &mut CaseLog {
        self.hst.case_log()
    }

    fn attach_diagnostics(&mut self) {
        self.hst.attach_diagnostics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resources;
    use crate::test_util::FakeVpp;

    #[test]
    fn session_stanza_variants() {
        assert_eq!(
            session_stanza(false).render().unwrap(),
            "\nsession {\n  enable\n  use-app-socket-api\n}\n"
        );
        assert!(session_stanza(true)
            .render()
            .unwrap()
            .contains("  use-private-rx-mqs\n}"));
        assert_eq!(
            http_stanza().render().unwrap(),
            "\nhttp {\n  http2 {\n    max-header-list-size 65536\n  }\n}\n"
        );
    }

    #[tokio::test]
    async fn setup_test_binds_both_sides() {
        let fake = FakeVpp::install().unwrap();
        let config = Arc::new(HarnessConfig {
            vpp_bin: fake.vpp_bin(),
            vppctl_bin: fake.vppctl_bin(),
            runtime_dir: fake.dir().to_path_buf(),
            simulate: true,
            ..HarnessConfig::default()
        });
        let pool = ResourcePool::with_cores(Resources::default(), (0..8).collect());
        let mut s = VethsSuite::ipv6(config, pool.clone());

        s.setup_suite().await.unwrap();
        assert_ne!(s.port1, s.port2);
        assert!(!s.server().unwrap().ip6_address_string().is_empty());

        let directive = s.setup_test("echo/TcpWithLoss6InterruptMode").await.unwrap();
        assert_eq!(directive, CaseDirective::Run);
        assert_eq!(s.server_vpp().unwrap().devices().len(), 1);
        assert_eq!(s.client_vpp().unwrap().devices().len(), 1);
        assert!(s.case_log().lines().iter().any(|l| l.contains("INTERRUPT MODE")));

        s.teardown_test().await.unwrap();
        assert!(s.server_vpp().is_err());
        s.teardown_suite().await.unwrap();
        assert_eq!(pool.outstanding(), 0);
    }
}
