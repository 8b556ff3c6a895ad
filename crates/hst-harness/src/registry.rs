//! Test registration.
//!
//! Test-definition units contribute functions to a [`Registry`] under a
//! group name fixed at the registration call (normally the unit's file
//! stem, see [`group!`](crate::group)). Each function carries an explicit
//! display name. Once registration ends the registry is frozen and only
//! read by the scheduler.

use std::path::Path;

use futures::future::BoxFuture;

use crate::error::HarnessResult;

/// A test body. Assertion failures are recorded on the suite's case log;
/// an `Err` means the body could not carry out its steps.
pub type TestFn<S> = for<'a> fn(&'a mut S) -> BoxFuture<'a, HarnessResult<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// May overlap with cases of other suite runs.
    Interleaved,
    /// Never overlaps with any other case.
    Solo,
}

pub struct TestCase<S> {
    pub name: String,
    pub func: TestFn<S>,
}

impl<S> TestCase<S> {
    pub fn new(name: impl Into<String>, func: TestFn<S>) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<S> Clone for TestCase<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func,
        }
    }
}

impl<S> std::fmt::Debug for TestCase<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

pub(crate) struct Bucket<S> {
    pub(crate) group: String,
    pub(crate) isolation: Isolation,
    pub(crate) cases: Vec<TestCase<S>>,
}

/// Buckets being populated. Additive only.
pub struct Registry<S> {
    buckets: Vec<Bucket<S>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    fn bucket(&mut self, group: &str, isolation: Isolation) -> &mut Vec<TestCase<S>> {
        let pos = self
            .buckets
            .iter()
            .position(|b| b.group == group && b.isolation == isolation);
        let idx = match pos {
            Some(idx) => idx,
            None => {
                self.buckets.push(Bucket {
                    group: group.to_string(),
                    isolation,
                    cases: Vec::new(),
                });
                self.buckets.len() - 1
            }
        };
        &mut self.buckets[idx].cases
    }

    /// Append interleavable cases to `group`'s bucket.
    pub fn register_tests(&mut self, group: &str, cases: Vec<TestCase<S>>) -> &mut Self {
        self.bucket(group, Isolation::Interleaved).extend(cases);
        self
    }

    /// Append solo cases to `group`'s bucket.
    pub fn register_solo_tests(&mut self, group: &str, cases: Vec<TestCase<S>>) -> &mut Self {
        self.bucket(group, Isolation::Solo).extend(cases);
        self
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the registration phase.
    pub fn freeze(self) -> FrozenRegistry<S> {
        FrozenRegistry {
            buckets: self.buckets,
        }
    }
}

/// Read-only registry handed to the scheduler.
pub struct FrozenRegistry<S> {
    pub(crate) buckets: Vec<Bucket<S>>,
}

impl<S> FrozenRegistry<S> {
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group names in first-registration order, without repeats.
    pub fn groups(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for b in &self.buckets {
            if !out.contains(&b.group.as_str()) {
                out.push(&b.group);
            }
        }
        out
    }
}

/// File stem of a source path: `tests/echo.rs` → `echo`.
pub fn group_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Group name of the calling source file.
#[macro_export]
macro_rules! group {
    () => {
        $crate::registry::group_from_path(file!())
    };
}

/// Build a `Vec<TestCase<_>>` from function names, each named after its
/// function.
#[macro_export]
macro_rules! cases {
    ($($f:ident),* $(,)?) => {
        vec![$($crate::registry::TestCase::new(stringify!($f), $f)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    struct Counter(u32);

    fn bump(s: &mut Counter) -> BoxFuture<'_, HarnessResult<()>> {
        async move {
            s.0 += 1;
            Ok(())
        }
        .boxed()
    }

    fn noop(_s: &mut Counter) -> BoxFuture<'_, HarnessResult<()>> {
        async { Ok(()) }.boxed()
    }

    #[test]
    fn group_is_the_file_stem() {
        assert_eq!(group_from_path("crates/hst-harness/src/bin/hst/echo.rs"), "echo");
        assert_eq!(group!(), "registry");
    }

    #[test]
    fn cases_macro_names_functions() {
        let cases: Vec<TestCase<Counter>> = cases![bump, noop];
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["bump", "noop"]);
    }

    #[test]
    fn registration_is_additive_per_group() {
        let mut reg = Registry::<Counter>::new();
        reg.register_tests("echo", cases![bump]);
        reg.register_solo_tests("echo", cases![noop]);
        reg.register_tests("http", cases![noop]);
        reg.register_tests("echo", cases![noop]);
        assert_eq!(reg.len(), 4);

        let frozen = reg.freeze();
        assert_eq!(frozen.groups(), ["echo", "http"]);
        assert_eq!(frozen.buckets[0].cases.len(), 2);
        assert_eq!(frozen.buckets[1].isolation, Isolation::Solo);
    }

    #[tokio::test]
    async fn registered_functions_run_against_the_suite() {
        let case = TestCase::new("bump", bump);
        let mut s = Counter(0);
        (case.func)(&mut s).await.unwrap();
        (case.clone().func)(&mut s).await.unwrap();
        assert_eq!(s.0, 2);
    }
}
