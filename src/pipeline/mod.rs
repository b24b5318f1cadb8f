//! The per-run execution pipeline.
//!
//! One [`Pipeline::execute`] call per detected change or manual invocation:
//! select the active test directory, compile-check candidates, generate
//! sweep harnesses, run them in order, deep-dive the first failure,
//! reconcile persisted breakpoints, and commit state. A run that fails the
//! syntax gate or crashes returns a terminal outcome without committing —
//! the previous snapshot stays untouched.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::analysis::{DeepDive, DeepDiveAnalyzer};
use crate::config::{StopPolicy, WatchConfig};
use crate::debug::reconcile_breakpoints;
use crate::error::{Result, VigilError};
use crate::harness::{file_label, run_harness, HarnessGenerator};
use crate::protocol::{has_crash_markers, split_transcript, TestEvent, Transcript};
use crate::state::persistence::StatePersistence;
use crate::state::{StateTracker, TestIdentity, TestStatus};

// ============================================================================
// Run Outcomes
// ============================================================================

/// Per-file results in sweep order.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub label: String,
    /// Method results in emission order.
    pub results: Vec<(String, TestStatus)>,
    /// The file legitimately contains no runnable tests.
    pub no_tests: bool,
}

/// The committed result of one completed run.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub files: Vec<FileReport>,
    /// Identities whose status changed since the previous completed run.
    pub transitioned: BTreeSet<TestIdentity>,
    /// The first `Failed` event across the whole sweep.
    pub first_failure: Option<TestIdentity>,
    pub deep_dive: Option<DeepDive>,
    /// Degradation note when deep-dive could not run.
    pub deep_dive_note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A candidate file failed the compile check.
#[derive(Debug, Clone)]
pub struct SyntaxReport {
    pub file: PathBuf,
    pub detail: String,
}

/// A harness aborted before producing any recognized event.
#[derive(Debug, Clone)]
pub struct CrashReport {
    pub label: String,
    pub output: String,
}

/// Terminal result of one pipeline execution.
#[derive(Debug)]
pub enum RunOutcome {
    /// The run completed and was committed.
    Completed(Box<RunSnapshot>),
    /// Syntax gate failed; nothing ran, nothing committed.
    SyntaxError(SyntaxReport),
    /// A harness crashed; the run aborted, nothing committed.
    Crash(CrashReport),
}

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrates one run end to end.
#[derive(Debug)]
pub struct Pipeline {
    config: WatchConfig,
    persistence: StatePersistence,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &WatchConfig) -> Self {
        let persistence = StatePersistence::new(config.scratch_dir());
        Self {
            config: config.clone(),
            persistence,
        }
    }

    #[must_use]
    pub fn persistence(&self) -> &StatePersistence {
        &self.persistence
    }

    /// Execute one full run.
    pub fn execute(&self, tracker: &mut StateTracker) -> Result<RunOutcome> {
        let active_dir = self.config.active_test_dir();
        debug!("active test directory: {}", active_dir.display());

        let sweep_files = self.sweep_files(&active_dir, tracker);

        let mut candidates = self.root_sources();
        candidates.extend(sweep_files.iter().cloned());
        if let Some(report) = self.validate_syntax(&candidates)? {
            info!("syntax gate failed: {}", report.file.display());
            return Ok(RunOutcome::SyntaxError(report));
        }

        if self.config.failed_only {
            self.persistence
                .write_run_tests(&tracker.previously_failing_methods())?;
        } else {
            self.persistence.clear_run_tests()?;
        }

        tracker.begin_run();
        let generator =
            HarnessGenerator::new(&self.config.project_root, self.config.scratch_dir());

        let mut files = Vec::new();
        let mut first_failure: Option<TestIdentity> = None;

        for source in &sweep_files {
            let label = file_label(source);
            let harness = generator.sweep(source)?;
            let output = run_harness(
                &self.config.python,
                &harness,
                &self.config.project_root,
                self.config.timeout_secs,
            )?;
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            let transcript = split_transcript(&combined);

            if transcript.recognized_count() == 0 && has_crash_markers(&combined) {
                info!("harness for '{label}' crashed; run aborted");
                return Ok(RunOutcome::Crash(CrashReport {
                    label,
                    output: combined,
                }));
            }

            let (report, file_failed) = accumulate(&transcript, &label, tracker);
            if first_failure.is_none() {
                first_failure = report
                    .results
                    .iter()
                    .find(|(_, s)| *s == TestStatus::Fail)
                    .map(|(m, _)| TestIdentity::new(&report.label, m));
            }
            files.push(report);

            if file_failed && self.config.stop_policy == StopPolicy::FirstFailure {
                debug!("stopping sweep after failure in '{label}'");
                break;
            }
        }

        let (deep_dive, deep_dive_note) = match &first_failure {
            Some(identity) => match DeepDiveAnalyzer::new(&self.config).analyze(identity) {
                Ok(dive) => (Some(dive), None),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("deep dive degraded: {e}");
                    (None, Some(format!("could not locate source: {e}")))
                }
            },
            None => (None, None),
        };

        if let Err(e) =
            reconcile_breakpoints(&self.config.scratch_dir(), &tracker.failing_identities())
        {
            warn!("breakpoint reconciliation failed: {e}");
        }

        tracker.finalize_outcomes();
        let transitioned = tracker.transitions();
        self.persistence.save(tracker.current_state())?;
        tracker.commit();

        Ok(RunOutcome::Completed(Box::new(RunSnapshot {
            files,
            transitioned,
            first_failure,
            deep_dive,
            deep_dive_note,
            timestamp: Utc::now(),
        })))
    }

    /// Qualifying sweep files in deterministic, numeric-aware order. Under
    /// failed-only mode, only files previously marked failing qualify.
    fn sweep_files(&self, active_dir: &Path, tracker: &StateTracker) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(active_dir)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
                    .collect()
            })
            .unwrap_or_default();

        if self.config.failed_only {
            let failing = tracker.previously_failing_files();
            files.retain(|p| failing.contains(&file_label(p)));
        }

        files.sort_by(|a, b| natural_cmp(&file_label(a), &file_label(b)));
        files
    }

    /// Root-level Python sources (the code under test).
    fn root_sources(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.config.project_root)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Compile-check every candidate; the first failure blocks the run.
    fn validate_syntax(&self, files: &[PathBuf]) -> Result<Option<SyntaxReport>> {
        for file in files {
            let output = std::process::Command::new(&self.config.python)
                .args(["-m", "py_compile"])
                .arg(file)
                .current_dir(&self.config.project_root)
                .output()
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        VigilError::MissingTool {
                            tool: self.config.python.clone(),
                        }
                    } else {
                        VigilError::tool(&self.config.python, e.to_string())
                    }
                })?;

            if !output.status.success() {
                return Ok(Some(SyntaxReport {
                    file: file.clone(),
                    detail: String::from_utf8_lossy(&output.stderr).into_owned(),
                }));
            }
        }
        Ok(None)
    }
}

/// Fold a transcript's events into the tracker and a per-file report.
fn accumulate(
    transcript: &Transcript,
    label: &str,
    tracker: &mut StateTracker,
) -> (FileReport, bool) {
    let mut report = FileReport {
        label: label.to_string(),
        results: Vec::new(),
        no_tests: false,
    };
    let mut file_failed = false;

    for event in &transcript.events {
        match event {
            TestEvent::Passed(method) => {
                tracker.record(TestIdentity::new(label, method), TestStatus::Pass);
                report.results.push((method.clone(), TestStatus::Pass));
            }
            TestEvent::Failed(method) => {
                tracker.record(TestIdentity::new(label, method), TestStatus::Fail);
                report.results.push((method.clone(), TestStatus::Fail));
                file_failed = true;
            }
            TestEvent::Skipped(method) => {
                tracker.record(TestIdentity::new(label, method), TestStatus::Skip);
                report.results.push((method.clone(), TestStatus::Skip));
            }
            TestEvent::NoTestsFound => report.no_tests = true,
            TestEvent::Unrecognized(_) => {}
        }
    }

    (report, file_failed)
}

/// Lexicographic comparison with numeric-aware runs: `file_2` sorts before
/// `file_10`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a_bytes.len() && j < b_bytes.len() {
        let (ac, bc) = (a_bytes[i], b_bytes[j]);
        if ac.is_ascii_digit() && bc.is_ascii_digit() {
            let a_run = digit_run(a_bytes, i);
            let b_run = digit_run(b_bytes, j);
            let a_num = trim_zeros(&a_bytes[i..a_run]);
            let b_num = trim_zeros(&b_bytes[j..b_run]);
            let ord = a_num
                .len()
                .cmp(&b_num.len())
                .then_with(|| a_num.cmp(b_num));
            if ord != Ordering::Equal {
                return ord;
            }
            i = a_run;
            j = b_run;
        } else {
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }
    }

    (a_bytes.len() - i).cmp(&(b_bytes.len() - j))
}

fn digit_run(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    end
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|b| *b != b'0');
    match first {
        Some(idx) => &digits[idx..],
        None => &digits[digits.len() - 1..],
    }
}
