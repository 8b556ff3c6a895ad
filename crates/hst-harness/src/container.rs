//! Container lifecycle.
//!
//! A container is a logical execution context bound to one namespace of the
//! suite's topology. VPP containers host one [`VppInstance`] per test; app
//! containers run short-lived commands pinned to their CPU set.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use hst_netns::Topology;
use tracing::{debug, info};

use crate::alloc::CpuSet;
use crate::command::CliCommand;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::instance::{InstanceSpec, Launcher, VppInstance};
use crate::stanza::Stanza;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    /// Hosts the stack under test.
    Vpp,
    /// Runs client/server applications against the stack.
    App,
}

/// Catalogue entry: a container name, its role and the topology namespace
/// role it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: &'static str,
    pub role: ContainerRole,
    pub namespace: &'static str,
}

const TWO_PEER: &[ContainerSpec] = &[
    ContainerSpec {
        name: "server-vpp",
        role: ContainerRole::Vpp,
        namespace: "srv",
    },
    ContainerSpec {
        name: "client-vpp",
        role: ContainerRole::Vpp,
        namespace: "cln",
    },
    ContainerSpec {
        name: "server-app",
        role: ContainerRole::App,
        namespace: "srv",
    },
    ContainerSpec {
        name: "client-app",
        role: ContainerRole::App,
        namespace: "cln",
    },
];

/// Resolve a container topology name.
pub fn container_topology(name: &str) -> Option<&'static [ContainerSpec]> {
    match name {
        "2peerVeth" | "2peerVeth6" => Some(TWO_PEER),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Container {
    name: String,
    role: ContainerRole,
    namespace: String,
    launcher: Launcher,
    dir: PathBuf,
    cpus: Option<CpuSet>,
    instance: Option<VppInstance>,
    started: bool,
}

impl Container {
    pub fn new(spec: &ContainerSpec, namespace: &str, launcher: Launcher, runtime_dir: &Path) -> Self {
        Self {
            name: spec.name.to_string(),
            role: spec.role,
            namespace: namespace.to_string(),
            launcher,
            dir: runtime_dir.join(format!("{namespace}-{}", spec.name)),
            cpus: None,
            instance: None,
            started: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ContainerRole {
        self.role
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// VPP containers are always pinned. App containers are only pinned
    /// inside a namespace, where their commands run under `taskset`.
    pub fn needs_cpus(&self) -> bool {
        self.role == ContainerRole::Vpp || matches!(self.launcher, Launcher::Netns(_))
    }

    /// Give this container a CPU set, replacing any previous one.
    pub fn assign_cpus(&mut self, cpus: CpuSet) {
        debug!(container = %self.name, cpus = %cpus, "cpus assigned");
        self.cpus = Some(cpus);
    }

    pub fn allocated_cpus(&self) -> &[usize] {
        self.cpus.as_ref().map(|c| c.cores()).unwrap_or(&[])
    }

    /// Create this test's instance from the container's CPU set and the
    /// given stanzas. Replaces a stopped instance; refuses while one runs.
    pub fn new_vpp_instance(
        &mut self,
        config: &HarnessConfig,
        stanzas: Vec<Stanza>,
    ) -> HarnessResult<&mut VppInstance> {
        if self.role != ContainerRole::Vpp {
            return Err(HarnessError::container(&self.name, "not a vpp container"));
        }
        if self.started {
            return Err(HarnessError::container(
                &self.name,
                "instance still running from a previous test",
            ));
        }
        let spec = InstanceSpec {
            container: self.name.clone(),
            launcher: self.launcher.clone(),
            dir: self.dir.clone(),
            vpp_bin: config.vpp_bin.clone(),
            vppctl_bin: config.vppctl_bin.clone(),
            start_timeout: config.timeouts.start,
        };
        let instance = VppInstance::new(spec, self.allocated_cpus().to_vec(), stanzas);
        Ok(self.instance.insert(instance))
    }

    pub fn instance(&self) -> HarnessResult<&VppInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| HarnessError::container(&self.name, "no vpp instance"))
    }

    pub fn instance_mut(&mut self) -> HarnessResult<&mut VppInstance> {
        self.instance
            .as_mut()
            .ok_or_else(|| HarnessError::container(&self.name, "no vpp instance"))
    }

    /// Start the container for this test. For VPP containers this launches
    /// the instance created by [`Container::new_vpp_instance`].
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.started {
            return Err(HarnessError::container(&self.name, "already started"));
        }
        if self.role == ContainerRole::Vpp {
            let name = self.name.clone();
            let instance = self
                .instance
                .as_mut()
                .ok_or_else(|| HarnessError::container(name, "start without a vpp instance"))?;
            instance.start().await?;
        }
        self.started = true;
        Ok(())
    }

    /// Stop the instance and release the CPU lease. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.stop().await;
        }
        self.cpus = None;
        self.started = false;
    }

    /// Run `program args..` inside the container, pinned to its CPU set
    /// when it lives in a real namespace. Returns stdout.
    pub async fn exec(&self, program: &str, args: &[&str]) -> HarnessResult<String> {
        let cmd_text = CliCommand::new(program).arg(args.join(" "));
        let mut cmd = match (&self.launcher, self.cpus.as_ref()) {
            (Launcher::Netns(_), Some(cpus)) => {
                let mut c = self.launcher.command("taskset");
                c.arg("-c").arg(cpus.to_string()).arg(program);
                c
            }
            _ => self.launcher.command(program),
        };
        debug!(container = %self.name, cmd = %cmd_text, "exec");
        let output = cmd
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.exec_error(&cmd_text, e.to_string()))?;
        if !output.status.success() {
            return Err(self.exec_error(
                &cmd_text,
                format!(
                    "exit {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn exec_error(&self, cmd: &CliCommand, reason: String) -> HarnessError {
        HarnessError::Command {
            container: self.name.clone(),
            command: cmd.to_string(),
            reason,
        }
    }
}

/// The containers of one suite, in catalogue order.
#[derive(Debug, Default)]
pub struct ContainerSet {
    containers: Vec<Container>,
}

impl ContainerSet {
    /// Bind the named container topology to `topology`'s namespaces.
    /// Processes launch inside those namespaces when the topology is live,
    /// on the host otherwise.
    pub fn load(name: &str, topology: &Topology, runtime_dir: &Path) -> HarnessResult<Self> {
        let specs = container_topology(name).ok_or_else(|| {
            HarnessError::Config(format!("unknown container topology '{name}'"))
        })?;
        let mut containers = Vec::with_capacity(specs.len());
        for spec in specs {
            let ns = topology.namespace_name(spec.namespace)?;
            let launcher = if topology.is_live() {
                Launcher::Netns(ns.to_string())
            } else {
                Launcher::Host
            };
            containers.push(Container::new(spec, ns, launcher, runtime_dir));
        }
        info!(topology = name, containers = containers.len(), "container topology loaded");
        Ok(Self { containers })
    }

    pub fn get_container_by_name(&self, name: &str) -> HarnessResult<&Container> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| HarnessError::container(name, "not found"))
    }

    pub fn get_container_by_name_mut(&mut self, name: &str) -> HarnessResult<&mut Container> {
        self.containers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| HarnessError::container(name, "not found"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.containers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub async fn stop_all(&mut self) {
        for c in self.containers.iter_mut() {
            c.stop().await;
        }
    }

    /// Log how to reach every started container.
    pub fn log_started(&self) {
        for c in self.containers.iter().filter(|c| c.started) {
            let socket = c
                .instance
                .as_ref()
                .map(|i| i.cli_socket().display().to_string())
                .unwrap_or_default();
            info!(
                container = %c.name,
                ns = %c.namespace,
                cpus = ?c.allocated_cpus(),
                cli = %socket,
                "container started"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ResourcePool;
    use crate::config::Resources;
    use crate::test_util::FakeVpp;
    use hst_netns::{TopologyPlan, TopologyShape};

    fn detached() -> Topology {
        TopologyPlan::new(TopologyShape::TwoPeerVeth, 11)
            .unwrap()
            .detached()
    }

    fn fake_config(fake: &FakeVpp) -> HarnessConfig {
        HarnessConfig {
            vpp_bin: fake.vpp_bin(),
            vppctl_bin: fake.vppctl_bin(),
            runtime_dir: fake.dir().to_path_buf(),
            simulate: true,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn load_binds_containers_to_namespaces() {
        let topo = detached();
        let set = ContainerSet::load("2peerVeth", &topo, Path::new("/tmp/hst")).unwrap();
        assert_eq!(set.len(), 4);
        let srv = set.get_container_by_name("server-vpp").unwrap();
        assert_eq!(srv.namespace(), topo.namespace_name("srv").unwrap());
        assert_eq!(srv.launcher(), &Launcher::Host);
        assert_eq!(
            set.get_container_by_name("client-app").unwrap().role(),
            ContainerRole::App
        );
        assert!(matches!(
            set.get_container_by_name("router"),
            Err(HarnessError::Container { .. })
        ));
    }

    #[test]
    fn unknown_container_topology_is_rejected() {
        let topo = detached();
        assert!(ContainerSet::load("ring", &topo, Path::new("/tmp/hst")).is_err());
    }

    #[tokio::test]
    async fn double_start_is_a_usage_error() {
        let fake = FakeVpp::install().unwrap();
        let config = fake_config(&fake);
        let pool = ResourcePool::with_cores(Resources::default(), (0..4).collect());
        let topo = detached();
        let mut set = ContainerSet::load("2peerVeth", &topo, fake.dir()).unwrap();

        let vpp = set.get_container_by_name_mut("server-vpp").unwrap();
        vpp.assign_cpus(pool.allocate_cpus(2).unwrap());
        vpp.new_vpp_instance(&config, Vec::new()).unwrap();
        vpp.start().await.unwrap();
        assert_eq!(vpp.instance().unwrap().cores(), &[0, 1]);

        let err = vpp.start().await.unwrap_err();
        assert!(matches!(err, HarnessError::Container { .. }));
        assert!(vpp.new_vpp_instance(&config, Vec::new()).is_err());

        set.stop_all().await;
        assert_eq!(pool.outstanding(), 0);
        let vpp = set.get_container_by_name("server-vpp").unwrap();
        assert!(!vpp.is_started());
        assert!(vpp.instance().is_err());
    }

    #[tokio::test]
    async fn app_container_runs_commands() {
        let topo = detached();
        let mut set = ContainerSet::load("2peerVeth", &topo, Path::new("/tmp/hst")).unwrap();
        let app = set.get_container_by_name_mut("client-app").unwrap();
        let out = app.exec("echo", &["hello", "world"]).await.unwrap();
        assert_eq!(out.trim(), "hello world");
        assert!(matches!(
            app.exec("false", &[]).await,
            Err(HarnessError::Command { .. })
        ));
        assert!(matches!(
            app.new_vpp_instance(&HarnessConfig::default(), Vec::new()),
            Err(HarnessError::Container { .. })
        ));
        app.start().await.unwrap();
        assert!(app.start().await.is_err());
    }

    #[test]
    fn only_namespaced_apps_need_cpus() {
        let topo = detached();
        let set = ContainerSet::load("2peerVeth", &topo, Path::new("/tmp/hst")).unwrap();
        let pinned: Vec<&str> = set.iter().filter(|c| c.needs_cpus()).map(|c| c.name()).collect();
        assert_eq!(pinned, ["server-vpp", "client-vpp"]);

        let spec = &container_topology("2peerVeth").unwrap()[3];
        let app = Container::new(spec, "cln1", Launcher::Netns("cln1".into()), Path::new("/tmp/hst"));
        assert!(app.needs_cpus());
    }
}
