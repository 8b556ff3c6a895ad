//! Instrumented-process controller.
//!
//! Owns one VPP process inside a container: renders its startup
//! configuration, launches it inside the container's namespace, transports
//! CLI commands to it and attaches af_packet devices to topology
//! interfaces. CLI output is returned as opaque text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use hst_netns::NetInterface;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::command::{self, CliCommand};
use crate::error::{HarnessError, HarnessResult};
use crate::stanza::Stanza;

/// How long a stopping instance gets before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);
const START_POLL: Duration = Duration::from_millis(50);

/// How processes reach their container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `sudo -n ip netns exec <ns> ...`
    Netns(String),
    /// Run directly on the host; used for fake instances.
    Host,
}

impl Launcher {
    pub fn command(&self, program: &str) -> Command {
        let mut cmd = match self {
            Launcher::Netns(ns) => {
                let mut c = Command::new("sudo");
                c.args(["-n", "ip", "netns", "exec", ns.as_str(), program]);
                c
            }
            Launcher::Host => Command::new(program),
        };
        cmd.kill_on_drop(true);
        cmd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Running,
    Stopped,
}

/// Everything an instance needs that does not change between tests.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub container: String,
    pub launcher: Launcher,
    /// Directory for the config, CLI socket and log.
    pub dir: PathBuf,
    pub vpp_bin: String,
    pub vppctl_bin: String,
    pub start_timeout: Duration,
}

#[derive(Debug)]
pub struct VppInstance {
    spec: InstanceSpec,
    cores: Vec<usize>,
    stanzas: Vec<Stanza>,
    child: Option<Child>,
    state: InstanceState,
    devices: BTreeMap<u32, String>,
}

impl VppInstance {
    pub fn new(spec: InstanceSpec, cores: Vec<usize>, stanzas: Vec<Stanza>) -> Self {
        Self {
            spec,
            cores,
            stanzas,
            child: None,
            state: InstanceState::Created,
            devices: BTreeMap::new(),
        }
    }

    pub fn container(&self) -> &str {
        &self.spec.container
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn cli_socket(&self) -> PathBuf {
        self.spec.dir.join("cli.sock")
    }

    pub fn config_path(&self) -> PathBuf {
        self.spec.dir.join("startup.conf")
    }

    pub fn log_path(&self) -> PathBuf {
        self.spec.dir.join("vpp.log")
    }

    /// Bound devices keyed by their non-zero interface index.
    pub fn devices(&self) -> &BTreeMap<u32, String> {
        &self.devices
    }

    /// Default stanzas followed by the caller's, rendered as one file.
    pub fn startup_config(&self) -> HarnessResult<String> {
        let mut base = Stanza::new();
        base.new_stanza("unix")
            .append("nodaemon")
            .append(format!("log {}", self.log_path().display()))
            .append("full-coredump")
            .append(format!("cli-listen {}", self.cli_socket().display()))
            .close();
        base.new_stanza("api-segment")
            .append(format!("prefix {}", self.spec.container))
            .close();
        base.new_stanza("api-trace").append("on").close();
        base.new_stanza("socksvr")
            .append(format!(
                "socket-name {}",
                self.spec.dir.join("api.sock").display()
            ))
            .close();
        if let Some((main, workers)) = self.cores.split_first() {
            base.new_stanza("cpu").append(format!("main-core {main}"));
            if !workers.is_empty() {
                let list: Vec<String> = workers.iter().map(|c| c.to_string()).collect();
                base.append(format!("corelist-workers {}", list.join(",")));
            }
            base.close();
        }
        base.new_stanza("plugins")
            .append("plugin default { disable }")
            .append("plugin af_packet_plugin.so { enable }")
            .append("plugin hs_apps_plugin.so { enable }")
            .append("plugin http_plugin.so { enable }")
            .append("plugin nsim_plugin.so { enable }")
            .close();

        let mut out = base.render()?;
        for stanza in &self.stanzas {
            out.push_str(&stanza.render()?);
        }
        Ok(out)
    }

    /// Launch the process and wait for its CLI socket.
    ///
    /// A second start without an intervening stop is an error. If the
    /// process does not come up within the start budget it is killed and
    /// its runtime files removed before the error is returned.
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.state == InstanceState::Running {
            return Err(HarnessError::container(
                &self.spec.container,
                "instance already started",
            ));
        }

        std::fs::create_dir_all(&self.spec.dir)?;
        let _ = std::fs::remove_file(self.cli_socket());
        std::fs::write(self.config_path(), self.startup_config()?)?;
        let log = std::fs::File::create(self.spec.dir.join("stdout.log"))?;
        let log_err = log.try_clone()?;

        let config = self.config_path();
        let mut cmd = self.spec.launcher.command(&self.spec.vpp_bin);
        cmd.arg("-c")
            .arg(&config)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        info!(container = %self.spec.container, cores = ?self.cores, "starting vpp");
        let child = cmd.spawn().map_err(|e| {
            HarnessError::start(&self.spec.container, format!("spawn {}: {e}", self.spec.vpp_bin))
        })?;
        self.child = Some(child);

        match self.wait_for_socket().await {
            Ok(()) => {
                self.state = InstanceState::Running;
                debug!(container = %self.spec.container, "vpp started");
                Ok(())
            }
            Err(e) => {
                warn!(container = %self.spec.container, error = %e, "vpp failed to start");
                self.kill_child().await;
                self.remove_runtime_files();
                self.state = InstanceState::Created;
                Err(e)
            }
        }
    }

    async fn wait_for_socket(&mut self) -> HarnessResult<()> {
        let socket = self.cli_socket();
        let deadline = tokio::time::Instant::now() + self.spec.start_timeout;
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(HarnessError::start(
                        &self.spec.container,
                        format!("exited during startup with {status}"),
                    ));
                }
            }
            if socket.exists() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::start(
                    &self.spec.container,
                    format!(
                        "cli socket {} did not appear within {:?}",
                        socket.display(),
                        self.spec.start_timeout
                    ),
                ));
            }
            tokio::time::sleep(START_POLL).await;
        }
    }

    /// Send a command over the CLI channel and return its captured output.
    pub async fn vppctl(&self, cmd: impl Into<CliCommand>) -> HarnessResult<String> {
        let cmd = cmd.into();
        if self.state != InstanceState::Running {
            return Err(HarnessError::container(
                &self.spec.container,
                format!("cannot run '{cmd}': instance not running"),
            ));
        }
        debug!(container = %self.spec.container, cmd = %cmd, "vppctl");

        let socket = self.cli_socket();
        let output = self
            .spec
            .launcher
            .command(&self.spec.vppctl_bin)
            .arg("-s")
            .arg(&socket)
            .args(cmd.words())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.command_error(&cmd, e.to_string()))?;

        if !output.status.success() {
            return Err(self.command_error(
                &cmd,
                format!(
                    "exit {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn command_error(&self, cmd: &CliCommand, reason: String) -> HarnessError {
        HarnessError::Command {
            container: self.spec.container.clone(),
            command: cmd.to_string(),
            reason,
        }
    }

    /// Attach an af_packet device to `iface`'s kernel end and give it the
    /// interface's address. Returns the device index, never 0.
    pub async fn create_af_packet(
        &mut self,
        iface: &NetInterface,
        promiscuous: bool,
    ) -> HarnessResult<u32> {
        let bind_err = |e: HarnessError| HarnessError::bind(iface.name(), e.to_string());
        let ifname = command::host_interface_name(iface.name());

        self.vppctl(command::create_host_interface(iface.name()))
            .await
            .map_err(bind_err)?;
        self.vppctl(command::interface_up(&ifname))
            .await
            .map_err(bind_err)?;
        self.vppctl(command::interface_address(&ifname, &iface.address_with_prefix()))
            .await
            .map_err(bind_err)?;
        if promiscuous {
            self.vppctl(command::interface_promiscuous(&ifname))
                .await
                .map_err(bind_err)?;
        }

        let listing = self
            .vppctl(command::show_interface(&ifname))
            .await
            .map_err(bind_err)?;
        let index = parse_interface_index(&listing, &ifname).ok_or_else(|| {
            HarnessError::bind(iface.name(), format!("{ifname} missing from interface list"))
        })?;
        if index == 0 {
            return Err(HarnessError::bind(
                iface.name(),
                "attach returned the unbound index 0",
            ));
        }
        self.devices.insert(index, ifname.clone());
        info!(container = %self.spec.container, ifname = %ifname, index, "af_packet bound");
        Ok(index)
    }

    /// Stop the process: SIGTERM, a grace period, then SIGKILL. Runtime
    /// files are removed. Stopping a stopped instance is a no-op.
    pub async fn stop(&mut self) {
        if self.child.is_none() {
            self.state = InstanceState::Stopped;
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if let Some(pid) = child.id() {
                // SAFETY: pid belongs to our own child; a stale pid is an
                // ESRCH no-op.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(_) => debug!(container = %self.spec.container, "vpp exited cleanly"),
                Err(_) => {
                    warn!(container = %self.spec.container, "vpp didn't exit cleanly, killing");
                }
            }
        }
        self.kill_child().await;
        self.remove_runtime_files();
        self.devices.clear();
        self.state = InstanceState::Stopped;
        info!(container = %self.spec.container, "vpp stopped");
    }

    async fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    fn remove_runtime_files(&self) {
        for path in [self.cli_socket(), self.spec.dir.join("api.sock")] {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Last `lines` lines of the process log, for failure diagnostics.
    pub fn log_tail(&self, lines: usize) -> String {
        let mut text = String::new();
        for path in [self.log_path(), self.spec.dir.join("stdout.log")] {
            text.push_str(&tail_file(&path, lines));
        }
        text
    }
}

fn tail_file(path: &Path, lines: usize) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut out = format!("==> {} <==\n", path.display());
    for line in &all[start..] {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Find `ifname`'s index in `show interface` output.
pub fn parse_interface_index(listing: &str, ifname: &str) -> Option<u32> {
    listing.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != ifname {
            return None;
        }
        words.next()?.parse().ok()
    })
}
