use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, HarnessResult};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub version: u32,
    pub vpp_bin: Option<String>,
    pub vppctl_bin: Option<String>,
    pub runtime_dir: Option<PathBuf>,
    pub timeouts: TimeoutsInput,
    pub resources: ResourcesInput,
    pub dry_run: Option<bool>,
    pub simulate: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutsInput {
    pub case_secs: Option<u64>,
    pub setup_secs: Option<u64>,
    pub teardown_secs: Option<u64>,
    pub start_secs: Option<u64>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourcesInput {
    pub cpus_per_container: Option<usize>,
    pub port_base: Option<u16>,
    pub ports_per_slot: Option<u16>,
    pub slots_per_process: Option<u16>,
    pub process_index: Option<u16>,
    pub parallel_processes: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Budget for a case body.
    pub case: Duration,
    /// Budget for per-case setup, including instance start and binds.
    pub setup: Duration,
    pub teardown: Duration,
    /// How long an instance may take to open its command channel.
    pub start: Duration,
    /// Fixed delay before suite setup.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            case: Duration::from_secs(300),
            setup: Duration::from_secs(60),
            teardown: Duration::from_secs(60),
            start: Duration::from_secs(10),
            settle: Duration::from_secs(1),
        }
    }
}

/// Partitioning of ports and CPUs between suites and runner processes.
#[derive(Debug, Clone)]
pub struct Resources {
    pub cpus_per_container: usize,
    pub port_base: u16,
    pub ports_per_slot: u16,
    pub slots_per_process: u16,
    /// Index of this runner among `parallel_processes` concurrent runners.
    pub process_index: u16,
    pub parallel_processes: u16,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpus_per_container: 1,
            port_base: 10000,
            ports_per_slot: 100,
            slots_per_process: 16,
            process_index: 0,
            parallel_processes: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub version: u32,
    pub vpp_bin: String,
    pub vppctl_bin: String,
    pub runtime_dir: PathBuf,
    pub timeouts: Timeouts,
    pub resources: Resources,
    /// Set up every case, then skip its body.
    pub dry_run: bool,
    /// Plan topologies without creating namespaces and launch processes on
    /// the host. Lets suites run against fake binaries without root.
    pub simulate: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            vpp_bin: std::env::var("HST_VPP_BIN").unwrap_or_else(|_| "vpp".to_string()),
            vppctl_bin: std::env::var("HST_VPPCTL_BIN").unwrap_or_else(|_| "vppctl".to_string()),
            runtime_dir: PathBuf::from("/tmp/hst"),
            timeouts: Timeouts::default(),
            resources: Resources::default(),
            dry_run: false,
            simulate: false,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl HarnessConfigInput {
    pub fn resolve(self) -> HarnessResult<HarnessConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(HarnessError::Config(format!(
                "unsupported config version {}",
                version
            )));
        }

        let defaults = HarnessConfig::default();
        let t = Timeouts::default();
        let timeouts = Timeouts {
            case: self.timeouts.case_secs.map(Duration::from_secs).unwrap_or(t.case),
            setup: self.timeouts.setup_secs.map(Duration::from_secs).unwrap_or(t.setup),
            teardown: self
                .timeouts
                .teardown_secs
                .map(Duration::from_secs)
                .unwrap_or(t.teardown),
            start: self.timeouts.start_secs.map(Duration::from_secs).unwrap_or(t.start),
            settle: self.timeouts.settle_ms.map(Duration::from_millis).unwrap_or(t.settle),
        };
        if timeouts.case.is_zero() || timeouts.setup.is_zero() || timeouts.start.is_zero() {
            return Err(HarnessError::Config("timeouts must be non-zero".into()));
        }

        let r = Resources::default();
        let resources = Resources {
            cpus_per_container: self
                .resources
                .cpus_per_container
                .unwrap_or(r.cpus_per_container),
            port_base: self.resources.port_base.unwrap_or(r.port_base),
            ports_per_slot: self.resources.ports_per_slot.unwrap_or(r.ports_per_slot),
            slots_per_process: self
                .resources
                .slots_per_process
                .unwrap_or(r.slots_per_process),
            process_index: self.resources.process_index.unwrap_or(r.process_index),
            parallel_processes: self
                .resources
                .parallel_processes
                .unwrap_or(r.parallel_processes),
        };
        resources.validate()?;

        Ok(HarnessConfig {
            version,
            vpp_bin: non_empty(self.vpp_bin).unwrap_or(defaults.vpp_bin),
            vppctl_bin: non_empty(self.vppctl_bin).unwrap_or(defaults.vppctl_bin),
            runtime_dir: self.runtime_dir.unwrap_or(defaults.runtime_dir),
            timeouts,
            resources,
            dry_run: self.dry_run.unwrap_or(false),
            simulate: self.simulate.unwrap_or(false),
        })
    }
}

impl Resources {
    pub fn validate(&self) -> HarnessResult<()> {
        if self.cpus_per_container == 0 {
            return Err(HarnessError::Config("cpus_per_container must be >= 1".into()));
        }
        if self.ports_per_slot == 0 || self.slots_per_process == 0 || self.parallel_processes == 0
        {
            return Err(HarnessError::Config(
                "ports_per_slot, slots_per_process and parallel_processes must be >= 1".into(),
            ));
        }
        if self.process_index >= self.parallel_processes {
            return Err(HarnessError::Config(format!(
                "process_index {} out of range for {} processes",
                self.process_index, self.parallel_processes
            )));
        }
        let span = self.port_base as u64
            + self.ports_per_slot as u64
                * self.slots_per_process as u64
                * self.parallel_processes as u64;
        if span > u16::MAX as u64 + 1 {
            return Err(HarnessError::Config(format!(
                "port range {}..{} exceeds the 16-bit port space",
                self.port_base, span
            )));
        }
        Ok(())
    }
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> HarnessResult<Self> {
        if input.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }
        let parsed: HarnessConfigInput = toml::from_str(input)
            .map_err(|e| HarnessError::Config(format!("invalid config TOML: {}", e)))?;
        parsed.resolve()
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}
