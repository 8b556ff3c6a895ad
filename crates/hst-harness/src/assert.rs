//! Case-local assertions.
//!
//! Checks record a failure against the running case and return whether
//! they held. They never unwind, so per-case teardown always runs.

use std::fmt;

use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub message: String,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Log lines and assertion failures collected for one case.
#[derive(Debug, Clone, Default)]
pub struct CaseLog {
    case: String,
    lines: Vec<String>,
    failures: Vec<AssertionFailure>,
}

impl CaseLog {
    pub fn new(case: impl Into<String>) -> Self {
        Self {
            case: case.into(),
            ..Self::default()
        }
    }

    pub fn case(&self) -> &str {
        &self.case
    }

    pub fn log(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(case = %self.case, "{}", text);
        self.lines.push(text);
    }

    /// Record diagnostic text without echoing it to the log output.
    pub fn attach(&mut self, text: impl Into<String>) {
        debug!(case = %self.case, "diagnostics attached");
        self.lines.push(text.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record a failure unconditionally.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(case = %self.case, "assertion failed: {}", message);
        self.failures.push(AssertionFailure { message });
    }

    fn check(&mut self, ok: bool, message: impl FnOnce() -> String) -> bool {
        if !ok {
            self.fail(message());
        }
        ok
    }

    pub fn assert_contains(&mut self, haystack: &str, needle: &str) -> bool {
        self.check(haystack.contains(needle), || {
            format!("expected output to contain '{needle}', got:\n{haystack}")
        })
    }

    pub fn assert_not_contains(&mut self, haystack: &str, needle: &str) -> bool {
        self.check(!haystack.contains(needle), || {
            format!("expected output not to contain '{needle}', got:\n{haystack}")
        })
    }

    /// `|actual - expected| <= threshold`
    pub fn assert_equal_within_threshold(
        &mut self,
        actual: f64,
        expected: f64,
        threshold: f64,
    ) -> bool {
        self.check((actual - expected).abs() <= threshold, || {
            format!("{actual} is not within {threshold} of {expected}")
        })
    }

    /// The operation succeeded.
    pub fn assert_ok<T, E: fmt::Display>(&mut self, result: &Result<T, E>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                self.fail(format!("unexpected error: {e}"));
                false
            }
        }
    }

    /// A value is present.
    pub fn assert_some<T>(&mut self, value: &Option<T>, what: &str) -> bool {
        self.check(value.is_some(), || format!("{what} is missing"))
    }

    pub fn assert_equal<T: PartialEq + fmt::Debug>(&mut self, actual: T, expected: T) -> bool {
        self.check(actual == expected, || {
            format!("expected {expected:?}, got {actual:?}")
        })
    }

    pub fn assert_not_equal<T: PartialEq + fmt::Debug>(&mut self, actual: T, unexpected: T) -> bool {
        self.check(actual != unexpected, || {
            format!("expected a value other than {unexpected:?}")
        })
    }

    /// `text` is empty; the failure message is the text itself.
    pub fn assert_empty(&mut self, text: &str) -> bool {
        self.check(text.is_empty(), || text.to_string())
    }
}
