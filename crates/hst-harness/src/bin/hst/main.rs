//! hst: host-stack namespace test runner.
//!
//! - Registers every test unit into per-suite registries
//! - Expands them into named cases and applies the selection flags
//! - Runs each suite as its own task; solo cases run alone
//! - Prints a text or JSON report and exits non-zero on any failure

mod echo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hst_harness::test_util::check_privileges;
use hst_harness::{
    suite_run, ExclusionGate, HarnessConfig, NamedCase, Registry, ResourcePool, ScheduleFilter,
    VethsSuite,
};
use tracing_subscriber::EnvFilter;

/// Host-stack namespace test runner.
#[derive(Parser, Debug)]
#[command(name = "hst", about = "Run VPP host-stack tests in network namespaces")]
struct Cli {
    /// Harness config file (TOML).
    #[arg(long, env = "HST_CONFIG")]
    config: Option<PathBuf>,

    /// Set up every case, log how to reach its containers, skip the body.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Plan topologies without creating them and launch instances on the
    /// host.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Per-case timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Only run cases whose name contains this string.
    #[arg(long)]
    filter: Option<String>,

    #[arg(long, default_value_t = false, conflicts_with = "solo_only")]
    skip_solo: bool,

    #[arg(long, default_value_t = false)]
    solo_only: bool,

    /// Print the scheduled cases and exit.
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Index of this runner among concurrently running runners.
    #[arg(long)]
    process_index: Option<u16>,

    #[arg(long)]
    parallel_processes: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    config.dry_run |= cli.dry_run;
    config.simulate |= cli.simulate;
    if let Some(secs) = cli.timeout_secs {
        anyhow::ensure!(secs > 0, "--timeout-secs must be positive");
        config.timeouts.case = Duration::from_secs(secs);
    }
    if let Some(index) = cli.process_index {
        config.resources.process_index = index;
    }
    if let Some(n) = cli.parallel_processes {
        config.resources.parallel_processes = n;
    }
    config.resources.validate()?;
    Ok(config)
}

fn print_cases(suite: &str, cases: &[NamedCase<VethsSuite>]) {
    for case in cases {
        match case.label() {
            Some(label) => println!("{suite}  {} [{label}]", case.name),
            None => println!("{suite}  {}", case.name),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli)?);

    let mut veth = Registry::new();
    let mut veth6 = Registry::new();
    echo::register(&mut veth, &mut veth6);
    let (veth, veth6) = (veth.freeze(), veth6.freeze());

    let filter = ScheduleFilter {
        name_contains: cli.filter.clone(),
        skip_solo: cli.skip_solo,
        solo_only: cli.solo_only,
    };
    let veth_cases = veth.schedule_filtered(&filter)?;
    let veth6_cases = veth6.schedule_filtered(&filter)?;

    if cli.list {
        print_cases("VethsSuite", &veth_cases);
        print_cases("Veths6Suite", &veth6_cases);
        return Ok(());
    }

    if !config.simulate && !check_privileges() {
        anyhow::bail!("namespace setup needs passwordless sudo and iproute2; try --simulate");
    }

    tracing::info!(
        cases = veth_cases.len() + veth6_cases.len(),
        dry_run = config.dry_run,
        simulate = config.simulate,
        process_index = config.resources.process_index,
        "hst starting"
    );

    let pool = ResourcePool::new(config.resources.clone());
    let gate = ExclusionGate::new();
    let mut runs = Vec::new();
    if !veth_cases.is_empty() {
        let suite = VethsSuite::new(config.clone(), pool.clone());
        runs.push((
            "VethsSuite".to_string(),
            suite_run(suite, veth_cases, gate.clone(), config.timeouts.clone()),
        ));
    }
    if !veth6_cases.is_empty() {
        let suite = VethsSuite::ipv6(config.clone(), pool.clone());
        runs.push((
            "Veths6Suite".to_string(),
            suite_run(suite, veth6_cases, gate.clone(), config.timeouts.clone()),
        ));
    }

    let report = hst_harness::run_all(runs).await;
    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }

    if pool.outstanding() != 0 {
        tracing::warn!(leases = pool.outstanding(), "resources still leased after run");
    }
    if !report.success() {
        std::process::exit(1);
    }
    Ok(())
}
