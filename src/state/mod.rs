//! Cross-run result state.
//!
//! The tracker holds two immutable-per-run snapshots: the state of the
//! previous completed run and the state being built by the current run.
//! Transition highlighting and the failed-only subset are both derived from
//! the comparison; nothing else in the pipeline mutates shared state.

pub mod persistence;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique key into all status maps: source file label plus method name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestIdentity {
    pub label: String,
    pub method: String,
}

impl TestIdentity {
    #[must_use]
    pub fn new(label: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            method: method.into(),
        }
    }

    /// Parse the `label::method` serialized form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (label, method) = raw.split_once("::")?;
        if label.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(label, method))
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.label, self.method)
    }
}

/// Status of one test in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// The full result state of one completed run: every known test status and
/// the set of file labels with at least one failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub statuses: BTreeMap<TestIdentity, TestStatus>,
    pub failed_files: BTreeSet<String>,
}

/// Tracks statuses across runs and computes transition/failed-only data.
#[derive(Debug, Default)]
pub struct StateTracker {
    previous: RunState,
    current: RunState,
    observed: BTreeSet<TestIdentity>,
}

impl StateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted state, so a restarted watch process keeps its
    /// transition-highlighting and failed-only filtering intact.
    #[must_use]
    pub fn from_persisted(state: RunState) -> Self {
        Self {
            previous: state.clone(),
            current: state,
            observed: BTreeSet::new(),
        }
    }

    /// Start a new run. The current snapshot begins as a copy of the
    /// previous one so identities not exercised this run carry over
    /// unchanged.
    pub fn begin_run(&mut self) {
        self.current = self.previous.clone();
        self.observed.clear();
    }

    /// Record a status observed in the current run.
    pub fn record(&mut self, identity: TestIdentity, status: TestStatus) {
        self.current.statuses.insert(identity.clone(), status);
        self.observed.insert(identity);
    }

    /// Whether this identity's status differs from the previous completed
    /// run. Only identities actually observed this run can transition; a
    /// first observation counts as a transition.
    #[must_use]
    pub fn status_changed(&self, identity: &TestIdentity) -> bool {
        self.observed.contains(identity)
            && self.previous.statuses.get(identity) != self.current.statuses.get(identity)
    }

    /// All identities flagged as transitioned in the current run.
    #[must_use]
    pub fn transitions(&self) -> BTreeSet<TestIdentity> {
        self.observed
            .iter()
            .filter(|id| self.status_changed(id))
            .cloned()
            .collect()
    }

    /// Identities currently failing.
    #[must_use]
    pub fn failing_identities(&self) -> BTreeSet<TestIdentity> {
        self.current
            .statuses
            .iter()
            .filter(|(_, s)| **s == TestStatus::Fail)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// File labels that failed as of the previous completed run; this is the
    /// failed-only execution subset.
    #[must_use]
    pub fn previously_failing_files(&self) -> BTreeSet<String> {
        self.previous.failed_files.clone()
    }

    /// Methods that failed as of the previous completed run.
    #[must_use]
    pub fn previously_failing_methods(&self) -> BTreeSet<String> {
        self.previous
            .statuses
            .iter()
            .filter(|(_, s)| **s == TestStatus::Fail)
            .map(|(id, _)| id.method.clone())
            .collect()
    }

    /// Recompute file outcomes for every file covered by this run. Files a
    /// run did not touch keep their recorded outcome.
    pub fn finalize_outcomes(&mut self) {
        let covered: BTreeSet<String> = self.observed.iter().map(|id| id.label.clone()).collect();
        for label in covered {
            let any_fail = self
                .current
                .statuses
                .iter()
                .any(|(id, s)| id.label == label && *s == TestStatus::Fail);
            if any_fail {
                self.current.failed_files.insert(label);
            } else {
                self.current.failed_files.remove(&label);
            }
        }
    }

    /// The snapshot being built by the current run.
    #[must_use]
    pub fn current_state(&self) -> &RunState {
        &self.current
    }

    /// Promote the current run to "previous". Call only after the run
    /// completed and its state was persisted — crashed and syntax-blocked
    /// runs never commit.
    pub fn commit(&mut self) {
        self.previous = self.current.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str, method: &str) -> TestIdentity {
        TestIdentity::new(label, method)
    }

    // ------------------------------------------------------------------------
    // Identity Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_identity_roundtrip() {
        let identity = id("test_fib", "test_base_case");
        assert_eq!(identity.to_string(), "test_fib::test_base_case");
        assert_eq!(TestIdentity::parse("test_fib::test_base_case"), Some(identity));
    }

    #[test]
    fn test_identity_parse_rejects_malformed() {
        assert!(TestIdentity::parse("no_separator").is_none());
        assert!(TestIdentity::parse("::method").is_none());
        assert!(TestIdentity::parse("label::").is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [TestStatus::Pass, TestStatus::Fail, TestStatus::Skip] {
            assert_eq!(TestStatus::parse(status.as_str()), Some(status));
        }
        assert!(TestStatus::parse("flaky").is_none());
    }

    // ------------------------------------------------------------------------
    // Tracker Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_fail_to_pass_transition_is_flagged() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Fail);
        tracker.commit();

        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Pass);
        assert!(tracker.status_changed(&id("f", "t")));
    }

    #[test]
    fn test_pass_to_pass_is_not_flagged() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Pass);
        tracker.commit();

        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Pass);
        assert!(!tracker.status_changed(&id("f", "t")));
    }

    #[test]
    fn test_first_observation_counts_as_transition() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("f", "t_new"), TestStatus::Pass);
        assert!(tracker.status_changed(&id("f", "t_new")));
    }

    #[test]
    fn test_unobserved_identity_never_transitions() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Fail);
        tracker.commit();

        tracker.begin_run();
        // t not exercised this run.
        assert!(!tracker.status_changed(&id("f", "t")));
        // And its status carries over unchanged.
        assert_eq!(
            tracker.current_state().statuses.get(&id("f", "t")),
            Some(&TestStatus::Fail)
        );
    }

    #[test]
    fn test_carry_over_in_failed_only_run() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("a", "t1"), TestStatus::Pass);
        tracker.record(id("b", "t2"), TestStatus::Fail);
        tracker.finalize_outcomes();
        tracker.commit();

        // Failed-only rerun touches only b::t2.
        tracker.begin_run();
        tracker.record(id("b", "t2"), TestStatus::Pass);
        tracker.finalize_outcomes();
        tracker.commit();

        let state = tracker.current_state();
        assert_eq!(state.statuses.get(&id("a", "t1")), Some(&TestStatus::Pass));
        assert_eq!(state.statuses.get(&id("b", "t2")), Some(&TestStatus::Pass));
        assert!(state.failed_files.is_empty());
    }

    #[test]
    fn test_outcomes_set_and_cleared() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("b", "t_ok"), TestStatus::Pass);
        tracker.record(id("b", "t_bad"), TestStatus::Fail);
        tracker.finalize_outcomes();
        tracker.commit();
        assert!(tracker.previously_failing_files().contains("b"));

        tracker.begin_run();
        tracker.record(id("b", "t_bad"), TestStatus::Pass);
        tracker.finalize_outcomes();
        tracker.commit();
        assert!(tracker.previously_failing_files().is_empty());
    }

    #[test]
    fn test_uncovered_file_keeps_outcome() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("a", "t"), TestStatus::Fail);
        tracker.finalize_outcomes();
        tracker.commit();

        tracker.begin_run();
        tracker.record(id("c", "t"), TestStatus::Pass);
        tracker.finalize_outcomes();
        tracker.commit();

        assert!(tracker.previously_failing_files().contains("a"));
    }

    #[test]
    fn test_failing_sets() {
        let mut tracker = StateTracker::new();
        tracker.begin_run();
        tracker.record(id("a", "t1"), TestStatus::Fail);
        tracker.record(id("a", "t2"), TestStatus::Skip);
        tracker.record(id("b", "t3"), TestStatus::Pass);
        tracker.finalize_outcomes();
        tracker.commit();

        assert_eq!(tracker.failing_identities().len(), 1);
        assert!(tracker.failing_identities().contains(&id("a", "t1")));
        assert_eq!(
            tracker.previously_failing_methods(),
            BTreeSet::from(["t1".to_string()])
        );
    }

    #[test]
    fn test_resume_from_persisted() {
        let mut state = RunState::default();
        state.statuses.insert(id("f", "t"), TestStatus::Fail);
        state.failed_files.insert("f".to_string());

        let mut tracker = StateTracker::from_persisted(state);
        assert!(tracker.previously_failing_files().contains("f"));

        tracker.begin_run();
        tracker.record(id("f", "t"), TestStatus::Pass);
        assert!(tracker.status_changed(&id("f", "t")));
    }
}
