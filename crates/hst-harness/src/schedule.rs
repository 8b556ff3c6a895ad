//! Expansion of a frozen registry into an ordered list of named cases.

use std::collections::HashSet;

use crate::error::{HarnessError, HarnessResult};
use crate::registry::{FrozenRegistry, Isolation, TestFn};

pub const SOLO_LABEL: &str = "SOLO";

pub struct NamedCase<S> {
    /// `group/name`, unique within a schedule.
    pub name: String,
    pub group: String,
    pub isolation: Isolation,
    pub func: TestFn<S>,
}

impl<S> NamedCase<S> {
    pub fn is_solo(&self) -> bool {
        self.isolation == Isolation::Solo
    }

    pub fn label(&self) -> Option<&'static str> {
        self.is_solo().then_some(SOLO_LABEL)
    }
}

impl<S> Clone for NamedCase<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            group: self.group.clone(),
            isolation: self.isolation,
            func: self.func,
        }
    }
}

impl<S> std::fmt::Debug for NamedCase<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCase")
            .field("name", &self.name)
            .field("isolation", &self.isolation)
            .finish()
    }
}

/// Narrows a schedule after it has been checked for duplicates.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    /// Keep cases whose name contains this substring.
    pub name_contains: Option<String>,
    pub skip_solo: bool,
    pub solo_only: bool,
}

impl ScheduleFilter {
    pub fn matches<S>(&self, case: &NamedCase<S>) -> bool {
        if self.skip_solo && case.is_solo() {
            return false;
        }
        if self.solo_only && !case.is_solo() {
            return false;
        }
        match &self.name_contains {
            Some(s) => case.name.contains(s.as_str()),
            None => true,
        }
    }
}

impl<S> FrozenRegistry<S> {
    /// One case per registered function: interleavable buckets first, then
    /// solo buckets, each in registration order. A repeated `group/name` is
    /// a registration error.
    pub fn schedule(&self) -> HarnessResult<Vec<NamedCase<S>>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.len());
        for isolation in [Isolation::Interleaved, Isolation::Solo] {
            for bucket in self.buckets.iter().filter(|b| b.isolation == isolation) {
                for case in &bucket.cases {
                    let name = format!("{}/{}", bucket.group, case.name);
                    if !seen.insert(name.clone()) {
                        return Err(HarnessError::Registration(format!(
                            "duplicate test case '{name}'"
                        )));
                    }
                    out.push(NamedCase {
                        name,
                        group: bucket.group.clone(),
                        isolation,
                        func: case.func,
                    });
                }
            }
        }
        Ok(out)
    }

    pub fn schedule_filtered(&self, filter: &ScheduleFilter) -> HarnessResult<Vec<NamedCase<S>>> {
        let mut cases = self.schedule()?;
        cases.retain(|c| filter.matches(c));
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, TestCase};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use proptest::prelude::*;

    struct Nop;

    fn t(_s: &mut Nop) -> BoxFuture<'_, HarnessResult<()>> {
        async { Ok(()) }.boxed()
    }

    fn names(cases: &[NamedCase<Nop>]) -> Vec<&str> {
        cases.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn interleaved_before_solo_in_registration_order() {
        let mut reg = Registry::<Nop>::new();
        reg.register_solo_tests("echo", vec![TestCase::new("tcp_with_loss", t)]);
        reg.register_tests(
            "echo",
            vec![TestCase::new("basic", t), TestCase::new("bandwidth", t)],
        );
        reg.register_tests("http", vec![TestCase::new("get", t)]);

        let cases = reg.freeze().schedule().unwrap();
        assert_eq!(
            names(&cases),
            ["echo/basic", "echo/bandwidth", "http/get", "echo/tcp_with_loss"]
        );
        assert_eq!(cases[3].label(), Some(SOLO_LABEL));
        assert_eq!(cases[0].label(), None);
    }

    #[test]
    fn duplicate_names_fail_fast() {
        let mut reg = Registry::<Nop>::new();
        reg.register_tests("echo", vec![TestCase::new("basic", t)]);
        reg.register_solo_tests("echo", vec![TestCase::new("basic", t)]);
        let err = reg.freeze().schedule().unwrap_err();
        assert!(matches!(err, HarnessError::Registration(ref m) if m.contains("echo/basic")));
    }

    #[test]
    fn filter_applies_after_duplicate_check() {
        let mut reg = Registry::<Nop>::new();
        reg.register_tests("echo", vec![TestCase::new("basic", t), TestCase::new("basic", t)]);
        let filter = ScheduleFilter {
            name_contains: Some("nothing".into()),
            ..Default::default()
        };
        assert!(reg.freeze().schedule_filtered(&filter).is_err());
    }

    #[test]
    fn filters_by_isolation_and_name() {
        let mut reg = Registry::<Nop>::new();
        reg.register_tests("echo", vec![TestCase::new("basic", t), TestCase::new("roundtrip", t)]);
        reg.register_solo_tests("echo", vec![TestCase::new("loss", t)]);
        let reg = reg.freeze();

        let solo = ScheduleFilter {
            solo_only: true,
            ..Default::default()
        };
        assert_eq!(names(&reg.schedule_filtered(&solo).unwrap()), ["echo/loss"]);

        let no_solo = ScheduleFilter {
            skip_solo: true,
            name_contains: Some("round".into()),
            ..Default::default()
        };
        assert_eq!(names(&reg.schedule_filtered(&no_solo).unwrap()), ["echo/roundtrip"]);
    }

    proptest! {
        #[test]
        fn one_case_per_function_in_order(
            groups in prop::collection::vec(
                (prop::sample::select(vec!["a", "b", "c"]), 1usize..5, any::<bool>()),
                1..8,
            )
        ) {
            let mut reg = Registry::<Nop>::new();
            let mut expected_interleaved = Vec::new();
            let mut expected_solo = Vec::new();
            for (i, (group, n, solo)) in groups.iter().enumerate() {
                let cases: Vec<TestCase<Nop>> =
                    (0..*n).map(|j| TestCase::new(format!("f{i}_{j}"), t)).collect();
                let names: Vec<String> =
                    cases.iter().map(|c| format!("{group}/{}", c.name)).collect();
                if *solo {
                    reg.register_solo_tests(group, cases);
                    expected_solo.push((*group, names));
                } else {
                    reg.register_tests(group, cases);
                    expected_interleaved.push((*group, names));
                }
            }

            // Buckets keep first-registration order per group.
            let order = |list: &Vec<(&str, Vec<String>)>| {
                let mut groups: Vec<&str> = Vec::new();
                for (g, _) in list {
                    if !groups.contains(g) {
                        groups.push(*g);
                    }
                }
                groups
                    .into_iter()
                    .flat_map(|g| {
                        list.iter()
                            .filter(move |(h, _)| *h == g)
                            .flat_map(|(_, n)| n.clone())
                    })
                    .collect::<Vec<String>>()
            };
            let mut expected = order(&expected_interleaved);
            expected.extend(order(&expected_solo));

            let cases = reg.freeze().schedule().unwrap();
            let got: Vec<String> = cases.iter().map(|c| c.name.clone()).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
