//! Per-case outcomes and the aggregated run report.

use std::fmt::Write as _;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    /// Assertions failed or the body panicked.
    Failed { failures: Vec<String> },
    /// The body returned an error, or teardown failed after a pass.
    Errored { reason: String },
    /// Per-case setup failed; the body never ran.
    SetupFailed { reason: String },
    TimedOut { after_ms: u64 },
    Skipped { reason: String },
}

impl CaseOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, CaseOutcome::Passed | CaseOutcome::Skipped { .. })
    }

    fn tag(&self) -> &'static str {
        match self {
            CaseOutcome::Passed => "PASS",
            CaseOutcome::Failed { .. } => "FAIL",
            CaseOutcome::Errored { .. } => "ERROR",
            CaseOutcome::SetupFailed { .. } => "SETUP-FAIL",
            CaseOutcome::TimedOut { .. } => "TIMEOUT",
            CaseOutcome::Skipped { .. } => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
    /// Captured case log; kept only for cases that did not pass.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            ..Self::default()
        }
    }

    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub suite_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut s = Summary::default();
        for suite in &self.suites {
            if suite.setup_error.is_some() || suite.teardown_error.is_some() {
                s.suite_errors += 1;
            }
            for case in &suite.cases {
                s.total += 1;
                match case.outcome {
                    CaseOutcome::Passed => s.passed += 1,
                    CaseOutcome::Failed { .. } | CaseOutcome::TimedOut { .. } => s.failed += 1,
                    CaseOutcome::Errored { .. } | CaseOutcome::SetupFailed { .. } => {
                        s.errored += 1
                    }
                    CaseOutcome::Skipped { .. } => s.skipped += 1,
                }
            }
        }
        s
    }

    pub fn success(&self) -> bool {
        let s = self.summary();
        s.failed == 0 && s.errored == 0 && s.suite_errors == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One line per case plus diagnostics for failures.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for suite in &self.suites {
            let _ = writeln!(out, "== {}", suite.suite);
            if let Some(e) = &suite.setup_error {
                let _ = writeln!(out, "  SUITE SETUP FAILED: {e}");
            }
            for case in &suite.cases {
                let label = case.label.map(|l| format!(" [{l}]")).unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  {:<10} {}{} ({} ms)",
                    case.outcome.tag(),
                    case.name,
                    label,
                    case.duration_ms
                );
                match &case.outcome {
                    CaseOutcome::Failed { failures } => {
                        for f in failures {
                            let _ = writeln!(out, "      {}", f.replace('\n', "\n      "));
                        }
                    }
                    CaseOutcome::Errored { reason }
                    | CaseOutcome::SetupFailed { reason }
                    | CaseOutcome::Skipped { reason } => {
                        let _ = writeln!(out, "      {reason}");
                    }
                    CaseOutcome::TimedOut { after_ms } => {
                        let _ = writeln!(out, "      no result after {after_ms} ms");
                    }
                    CaseOutcome::Passed => {}
                }
            }
            if let Some(e) = &suite.teardown_error {
                let _ = writeln!(out, "  SUITE TEARDOWN FAILED: {e}");
            }
        }
        let s = self.summary();
        let _ = writeln!(
            out,
            "{} cases: {} passed, {} failed, {} errored, {} skipped",
            s.total, s.passed, s.failed, s.errored, s.skipped
        );
        out
    }
}
