//! End-to-end veth suite runs against fake `vpp`/`vppctl` binaries in
//! simulated mode: planned topology, processes on the host.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use hst_harness::command::{nsim_output_feature, session_uri};
use hst_harness::config::{Resources, Timeouts};
use hst_harness::test_util::FakeVpp;
use hst_harness::{
    cases, run_all, suite_run, CaseOutcome, CliCommand, ExclusionGate, HarnessConfig,
    HarnessResult, NsimConfig, Proto, Registry, ResourcePool, RunReport, VethsSuite,
};

fn echo_probe(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let uri = session_uri(Proto::Tcp, s.server()?, s.port1);
        let o = s
            .server_vpp()?
            .vppctl(CliCommand::new("test echo server").kv("uri", &uri))
            .await?;
        s.hst.log(&o);
        s.hst.assert_contains(&o, &uri);
        s.hst.assert_not_equal(s.port1, s.port2);
        Ok(())
    }
    .boxed()
}

fn loss_probe(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let device = s.client()?.name().to_string();
        let vpp = s.client_vpp()?;
        let nsim = vpp.vppctl(NsimConfig::default().command()).await?;
        let feature = vpp
            .vppctl(nsim_output_feature(&format!("host-{device}")))
            .await?;
        s.hst.assert_contains(&nsim, "packets-per-drop 1000");
        s.hst.assert_contains(&feature, &device);
        Ok(())
    }
    .boxed()
}

fn app_probe(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        let out = s.client_app()?.exec("echo", &["from", "client-app"]).await?;
        s.hst.assert_contains(&out, "from client-app");
        Ok(())
    }
    .boxed()
}

fn hangs_in_vppctl(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        s.server_vpp()?.vppctl("hang").await?;
        Ok(())
    }
    .boxed()
}

fn holds_cores(s: &mut VethsSuite) -> BoxFuture<'_, HarnessResult<()>> {
    async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let o = s.client_vpp()?.vppctl("show version").await?;
        s.hst.assert_contains(&o, "show version");
        Ok(())
    }
    .boxed()
}

fn config(fake: &FakeVpp, dry_run: bool, case_timeout: Duration) -> Arc<HarnessConfig> {
    Arc::new(HarnessConfig {
        vpp_bin: fake.vpp_bin(),
        vppctl_bin: fake.vppctl_bin(),
        runtime_dir: fake.dir().join("run"),
        timeouts: Timeouts {
            case: case_timeout,
            setup: Duration::from_secs(20),
            teardown: Duration::from_secs(20),
            start: Duration::from_secs(5),
            settle: Duration::ZERO,
        },
        dry_run,
        simulate: true,
        ..HarnessConfig::default()
    })
}

fn probes() -> Registry<VethsSuite> {
    let group = hst_harness::group!();
    let mut reg = Registry::new();
    reg.register_tests(&group, cases![echo_probe, app_probe]);
    reg.register_solo_tests(&group, cases![loss_probe]);
    reg
}

async fn run_registry(
    config: Arc<HarnessConfig>,
    pool: &ResourcePool,
    reg: Registry<VethsSuite>,
) -> RunReport {
    hst_harness::init_tracing();
    let cases = reg.freeze().schedule().unwrap();
    let suite = VethsSuite::new(config.clone(), pool.clone());
    run_all(vec![(
        "VethsSuite".to_string(),
        suite_run(suite, cases, ExclusionGate::new(), config.timeouts.clone()),
    )])
    .await
}

async fn run(fake: &FakeVpp, dry_run: bool) -> (RunReport, ResourcePool) {
    let pool = ResourcePool::with_cores(Resources::default(), (0..8).collect());
    let config = config(fake, dry_run, Duration::from_secs(20));
    let report = run_registry(config, &pool, probes()).await;
    (report, pool)
}

#[tokio::test]
async fn interleaved_and_solo_cases_run_and_release_everything() {
    let fake = FakeVpp::install().unwrap();
    let (report, pool) = run(&fake, false).await;

    assert!(report.success(), "{}", report.render_text());
    let suite = &report.suites[0];
    assert!(suite.setup_error.is_none());
    assert!(suite.teardown_error.is_none());
    let names: Vec<&str> = suite.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "veth_simulated/echo_probe",
            "veth_simulated/app_probe",
            "veth_simulated/loss_probe",
        ]
    );
    assert_eq!(suite.cases[2].label, Some("SOLO"));
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn dry_run_starts_instances_and_skips_bodies() {
    let fake = FakeVpp::install().unwrap();
    let (report, pool) = run(&fake, true).await;

    let suite = &report.suites[0];
    assert_eq!(suite.cases.len(), 3);
    for case in &suite.cases {
        assert!(
            matches!(case.outcome, CaseOutcome::Skipped { .. }),
            "{}: {:?}",
            case.name,
            case.outcome
        );
    }
    assert!(report.success());
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn failed_start_is_a_setup_failure_per_case() {
    let fake = FakeVpp::install_failing().unwrap();
    let (report, pool) = run(&fake, false).await;

    let suite = &report.suites[0];
    assert!(suite.setup_error.is_none());
    for case in &suite.cases {
        match &case.outcome {
            CaseOutcome::SetupFailed { reason } => assert!(reason.contains("server-vpp")),
            other => panic!("{}: unexpected {other:?}", case.name),
        }
        assert!(
            case.log.iter().any(|l| l.contains("cannot open config")),
            "{}: vpp output missing from {:?}",
            case.name,
            case.log
        );
    }
    assert!(!report.success());
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn unbound_device_index_fails_setup() {
    let fake = FakeVpp::install_with_index(0).unwrap();
    let (report, pool) = run(&fake, false).await;

    for case in &report.suites[0].cases {
        match &case.outcome {
            CaseOutcome::SetupFailed { reason } => assert!(reason.contains("bind")),
            other => panic!("{}: unexpected {other:?}", case.name),
        }
    }
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn hung_command_times_out_and_the_suite_moves_on() {
    let fake = FakeVpp::install().unwrap();
    let pool = ResourcePool::with_cores(Resources::default(), (0..8).collect());
    let mut reg = Registry::new();
    reg.register_tests(&hst_harness::group!(), cases![hangs_in_vppctl, echo_probe]);
    let report = run_registry(config(&fake, false, Duration::from_secs(2)), &pool, reg).await;

    let suite = &report.suites[0];
    assert!(matches!(
        suite.cases[0].outcome,
        CaseOutcome::TimedOut { after_ms: 2000 }
    ));
    assert_eq!(suite.cases[1].outcome, CaseOutcome::Passed);
    assert!(suite.teardown_error.is_none());
    assert_eq!(pool.outstanding(), 0);
}

async fn two_suites_over(cores: Vec<usize>) -> (RunReport, ResourcePool) {
    hst_harness::init_tracing();
    let fake = FakeVpp::install().unwrap();
    let config = config(&fake, false, Duration::from_secs(20));
    let pool = ResourcePool::with_cores(Resources::default(), cores);
    let gate = ExclusionGate::new();

    let group = hst_harness::group!();
    let mut runs = Vec::new();
    for suite in [
        VethsSuite::new(config.clone(), pool.clone()),
        VethsSuite::ipv6(config.clone(), pool.clone()),
    ] {
        let mut reg = Registry::new();
        reg.register_tests(&group, cases![holds_cores]);
        let cases = reg.freeze().schedule().unwrap();
        let name = suite.hst.name().to_string();
        runs.push((
            name,
            suite_run(suite, cases, gate.clone(), config.timeouts.clone()),
        ));
    }
    let report = run_all(runs).await;
    (report, pool)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suites_wait_for_cores_held_by_another_suite() {
    let (report, pool) = two_suites_over(vec![0, 1]).await;
    assert_eq!(report.suites.len(), 2);
    assert!(report.success(), "{}", report.render_text());
    assert_eq!(report.summary().passed, 2);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_core_pool_shares_cores() {
    let (report, pool) = two_suites_over(vec![0]).await;
    assert!(report.success(), "{}", report.render_text());
    assert_eq!(pool.outstanding(), 0);
}
