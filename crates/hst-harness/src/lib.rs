//! Declarative integration-test harness for a userspace network stack.
//!
//! Suites build a namespace topology once, start VPP instances bound to it
//! for every case, and drive them through their CLI. Test functions are
//! registered into an explicit [`Registry`], expanded into named cases by
//! the scheduler and run under per-stage timeouts, with solo cases kept
//! apart from everything else by a run-wide gate.

pub mod alloc;
pub mod assert;
pub mod command;
pub mod config;
pub mod container;
pub mod error;
pub mod instance;
pub mod registry;
pub mod report;
pub mod runner;
pub mod schedule;
pub mod stanza;
pub mod suite;
pub mod veth;

pub mod test_util;

pub use alloc::{CpuSet, ResourcePool, SuiteSlot};
pub use assert::{AssertionFailure, CaseLog};
pub use command::{CliCommand, NsimConfig, Proto};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use registry::{FrozenRegistry, Registry, TestCase, TestFn};
pub use report::{CaseOutcome, CaseReport, RunReport, SuiteReport};
pub use runner::{run_all, run_suite, suite_run, CaseDirective, ExclusionGate, SuiteLifecycle};
pub use schedule::{NamedCase, ScheduleFilter};
pub use stanza::Stanza;
pub use suite::HstSuite;
pub use test_util::init_tracing;
pub use veth::VethsSuite;
