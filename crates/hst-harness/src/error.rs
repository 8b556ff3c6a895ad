//! Harness error taxonomy.
//!
//! Assertion failures and timeouts are not errors: they are case outcomes
//! recorded in [`crate::report::CaseOutcome`].

use hst_netns::TopologyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Unresolvable or unbuildable topology. Fatal to the suite.
    #[error("topology: {0}")]
    Topology(#[from] TopologyError),
    /// Missing container, double start, or use of a container that has no
    /// running instance. Fatal to case setup.
    #[error("container '{container}': {reason}")]
    Container { container: String, reason: String },
    /// Device attach failed or returned the reserved unbound index.
    #[error("bind {interface}: {reason}")]
    Bind { interface: String, reason: String },
    /// The instrumented process did not come up.
    #[error("start {container}: {reason}")]
    Start { container: String, reason: String },
    /// Duplicate case name or similar schedule-time misconfiguration.
    #[error("registration: {0}")]
    Registration(String),
    /// Port or CPU pool exhausted.
    #[error("resource: {0}")]
    Resource(String),
    /// The command channel to a running instance failed to deliver.
    #[error("command '{command}' on {container}: {reason}")]
    Command {
        container: String,
        command: String,
        reason: String,
    },
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn container(container: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Container {
            container: container.into(),
            reason: reason.into(),
        }
    }

    pub fn start(container: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Start {
            container: container.into(),
            reason: reason.into(),
        }
    }

    pub fn bind(interface: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Bind {
            interface: interface.into(),
            reason: reason.into(),
        }
    }
}
