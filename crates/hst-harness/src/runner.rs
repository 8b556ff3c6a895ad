//! Suite runner.
//!
//! Drives one suite through its lifecycle: settle delay, suite setup, then
//! every scheduled case as setup → body → teardown, then suite teardown.
//! Cases of one suite run sequentially. Several suites may run at once;
//! the shared [`ExclusionGate`] keeps solo cases from overlapping anything.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};

use crate::assert::CaseLog;
use crate::config::Timeouts;
use crate::error::HarnessResult;
use crate::report::{CaseOutcome, CaseReport, RunReport, SuiteReport};
use crate::schedule::NamedCase;

/// What per-case setup decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseDirective {
    Run,
    /// Setup completed but the body must not run (dry run).
    Skip(String),
}

/// Lifecycle hooks of a topology suite.
///
/// Hooks return boxed futures so the runner can bound and abandon them.
pub trait SuiteLifecycle: Send {
    fn name(&self) -> &str;

    fn setup_suite(&mut self) -> BoxFuture<'_, HarnessResult<()>>;

    fn setup_test<'a>(&'a mut self, case: &'a str) -> BoxFuture<'a, HarnessResult<CaseDirective>>;

    fn teardown_test(&mut self) -> BoxFuture<'_, HarnessResult<()>>;

    fn teardown_suite(&mut self) -> BoxFuture<'_, HarnessResult<()>>;

    /// Log and assertion record of the running case.
    fn case_log(&mut self) -> &mut CaseLog;

    /// Add process output to the record of a case that did not pass.
    /// Runs before per-case teardown, while instances still exist.
    fn attach_diagnostics(&mut self) {}
}

/// Run-wide lock: interleavable cases share it, solo cases take it alone.
#[derive(Debug, Clone, Default)]
pub struct ExclusionGate {
    lock: Arc<RwLock<()>>,
}

pub enum GateGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl ExclusionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(&self, solo: bool) -> GateGuard {
        if solo {
            GateGuard::Exclusive(self.lock.clone().write_owned().await)
        } else {
            GateGuard::Shared(self.lock.clone().read_owned().await)
        }
    }
}

enum Stage<T> {
    Done(T),
    Failed(String),
    Panicked(String),
    TimedOut,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run one stage under `budget`, turning errors, panics and overruns into
/// a [`Stage`]. Dropping the future on timeout abandons it at its current
/// await point.
async fn bounded<T, F>(budget: Duration, fut: F) -> Stage<T>
where
    F: Future<Output = HarnessResult<T>>,
{
    match tokio::time::timeout(budget, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(Ok(v))) => Stage::Done(v),
        Ok(Ok(Err(e))) => Stage::Failed(e.to_string()),
        Ok(Err(payload)) => Stage::Panicked(panic_message(payload)),
        Err(_) => Stage::TimedOut,
    }
}

fn stage_error<T>(stage: Stage<T>, budget: Duration) -> Option<String> {
    match stage {
        Stage::Done(_) => None,
        Stage::Failed(e) => Some(e),
        Stage::Panicked(m) => Some(format!("panicked: {m}")),
        Stage::TimedOut => Some(format!("timed out after {budget:?}")),
    }
}

/// Run `suite` over `cases` and report every case.
///
/// Suite teardown runs even when suite setup fails; in that case no case
/// runs and the report carries the setup error instead.
pub async fn run_suite<S: SuiteLifecycle>(
    mut suite: S,
    cases: Vec<NamedCase<S>>,
    gate: ExclusionGate,
    timeouts: Timeouts,
) -> SuiteReport {
    let mut report = SuiteReport::new(suite.name());
    let suite_name = report.suite.clone();

    tokio::time::sleep(timeouts.settle).await;

    info!(suite = %suite_name, cases = cases.len(), "suite setup");
    let setup = bounded(timeouts.setup, suite.setup_suite()).await;
    if let Some(e) = stage_error(setup, timeouts.setup) {
        error!(suite = %suite_name, error = %e, "suite setup failed");
        report.setup_error = Some(e);
    } else {
        for case in &cases {
            let result = run_case(&mut suite, case, &gate, &timeouts).await;
            report.cases.push(result);
        }
    }

    let teardown = bounded(timeouts.teardown, suite.teardown_suite()).await;
    if let Some(e) = stage_error(teardown, timeouts.teardown) {
        error!(suite = %suite_name, error = %e, "suite teardown failed");
        report.teardown_error = Some(e);
    }
    info!(suite = %suite_name, "suite done");
    report
}

async fn run_case<S: SuiteLifecycle>(
    suite: &mut S,
    case: &NamedCase<S>,
    gate: &ExclusionGate,
    timeouts: &Timeouts,
) -> CaseReport {
    let _guard = gate.enter(case.is_solo()).await;
    let started = Instant::now();
    *suite.case_log() = CaseLog::new(&case.name);
    suite.case_log().log(format!("{}: BEGIN", case.name));

    let setup = bounded(timeouts.setup, suite.setup_test(&case.name)).await;
    let mut outcome = match setup {
        Stage::Done(CaseDirective::Run) => {
            let body = bounded(timeouts.case, (case.func)(suite)).await;
            match body {
                Stage::Done(()) => {
                    let failures = suite.case_log().failures();
                    if failures.is_empty() {
                        CaseOutcome::Passed
                    } else {
                        CaseOutcome::Failed {
                            failures: failures.iter().map(|f| f.message.clone()).collect(),
                        }
                    }
                }
                Stage::Failed(reason) => CaseOutcome::Errored { reason },
                Stage::Panicked(m) => {
                    let mut failures: Vec<String> = suite
                        .case_log()
                        .failures()
                        .iter()
                        .map(|f| f.message.clone())
                        .collect();
                    failures.push(format!("panicked: {m}"));
                    CaseOutcome::Failed { failures }
                }
                Stage::TimedOut => {
                    warn!(case = %case.name, "case timed out");
                    CaseOutcome::TimedOut {
                        after_ms: timeouts.case.as_millis() as u64,
                    }
                }
            }
        }
        Stage::Done(CaseDirective::Skip(reason)) => CaseOutcome::Skipped { reason },
        other => CaseOutcome::SetupFailed {
            reason: stage_error(other, timeouts.setup).unwrap_or_default(),
        },
    };

    if outcome.is_failure() {
        suite.attach_diagnostics();
    }

    let teardown = bounded(timeouts.teardown, suite.teardown_test()).await;
    if let Some(e) = stage_error(teardown, timeouts.teardown) {
        warn!(case = %case.name, error = %e, "case teardown failed");
        suite.case_log().log(format!("teardown failed: {e}"));
        if matches!(outcome, CaseOutcome::Passed | CaseOutcome::Skipped { .. }) {
            outcome = CaseOutcome::Errored {
                reason: format!("teardown: {e}"),
            };
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(case = %case.name, outcome = ?outcome, duration_ms, "case finished");
    let log = if outcome.is_failure() {
        std::mem::take(suite.case_log()).lines().to_vec()
    } else {
        Vec::new()
    };
    CaseReport {
        name: case.name.clone(),
        label: case.label(),
        outcome,
        duration_ms,
        log,
    }
}

/// A suite run with its type erased, ready to be spawned.
pub type SuiteRun = BoxFuture<'static, SuiteReport>;

pub fn suite_run<S: SuiteLifecycle + 'static>(
    suite: S,
    cases: Vec<NamedCase<S>>,
    gate: ExclusionGate,
    timeouts: Timeouts,
) -> SuiteRun {
    run_suite(suite, cases, gate, timeouts).boxed()
}

/// Run every suite concurrently on the current runtime.
pub async fn run_all(runs: Vec<(String, SuiteRun)>) -> RunReport {
    let handles: Vec<_> = runs
        .into_iter()
        .map(|(name, run)| (name, tokio::spawn(run)))
        .collect();
    let mut report = RunReport::default();
    for (name, handle) in handles {
        match handle.await {
            Ok(suite) => report.suites.push(suite),
            Err(e) => {
                error!(suite = %name, error = %e, "suite task failed");
                let mut suite = SuiteReport::new(name);
                suite.setup_error = Some(format!("suite task failed: {e}"));
                report.suites.push(suite);
            }
        }
    }
    report
}
