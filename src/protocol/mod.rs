//! Typed decoding of harness output.
//!
//! Harnesses report results over stdout as a fixed line protocol. This
//! module turns raw lines into a closed set of [`TestEvent`] variants and
//! splits a full transcript into its sentinel-demarcated sections. Anything
//! outside the protocol is carried through as opaque payload for the
//! deep-dive analyzer — control flow never keys off free-form text.

// ============================================================================
// Protocol Constants
// ============================================================================

/// Prefix of a passing test result line.
pub const PASSED_PREFIX: &str = "passed: ";

/// Prefix of a failing test result line.
pub const FAILED_PREFIX: &str = "FAILED_METHOD: ";

/// Prefix of a skipped test result line.
pub const SKIPPED_PREFIX: &str = "skipped: ";

/// Marker emitted when a file contains no runnable tests.
pub const NO_TESTS_MARKER: &str = "NO_TESTS_FOUND_IN_FILE";

/// Legacy marker for a file without any TestCase class; folded into
/// [`TestEvent::NoTestsFound`].
pub const NO_CLASS_MARKER: &str = "NO_TEST_CLASS_FOUND";

/// Sentinel opening the execution log of an isolated harness.
pub const TEST_START_SENTINEL: &str = "___TEST_START___";

/// Sentinel opening the failure summary block.
pub const SUMMARY_START_SENTINEL: &str = "___FAILURE_SUMMARY_START___";

/// Sentinel closing the failure summary block.
pub const SUMMARY_END_SENTINEL: &str = "___FAILURE_SUMMARY_END___";

/// Prefix of executed-statement lines in the execution log.
pub const EXEC_PREFIX: &str = "[EXE] ";

// ============================================================================
// Events
// ============================================================================

/// One decoded line of harness output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEvent {
    /// A test method passed.
    Passed(String),
    /// A test method failed.
    Failed(String),
    /// A test method was skipped.
    Skipped(String),
    /// The file contained no runnable tests.
    NoTestsFound,
    /// Any line outside the protocol; preserved as payload.
    Unrecognized(String),
}

impl TestEvent {
    /// Whether this event is part of the recognized protocol.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// The test method name, for result-bearing events.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Passed(m) | Self::Failed(m) | Self::Skipped(m) => Some(m),
            _ => None,
        }
    }
}

/// Decode a single line of harness output.
///
/// Recognition is by fixed prefix only. Result names are trimmed; an empty
/// name does not count as a result.
#[must_use]
pub fn decode_line(line: &str) -> TestEvent {
    let trimmed = line.trim_end();

    if let Some(name) = trimmed.strip_prefix(PASSED_PREFIX) {
        if !name.trim().is_empty() {
            return TestEvent::Passed(name.trim().to_string());
        }
    }
    if let Some(name) = trimmed.strip_prefix(FAILED_PREFIX) {
        if !name.trim().is_empty() {
            return TestEvent::Failed(name.trim().to_string());
        }
    }
    if let Some(name) = trimmed.strip_prefix(SKIPPED_PREFIX) {
        if !name.trim().is_empty() {
            return TestEvent::Skipped(name.trim().to_string());
        }
    }
    if trimmed == NO_TESTS_MARKER || trimmed == NO_CLASS_MARKER {
        return TestEvent::NoTestsFound;
    }

    TestEvent::Unrecognized(line.to_string())
}

// ============================================================================
// Transcripts
// ============================================================================

/// A harness transcript split into its sections.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    /// Recognized protocol events, in emission order.
    pub events: Vec<TestEvent>,
    /// Executed statements from the `[EXE]` line trace.
    pub exec_log: Vec<String>,
    /// Lines between the failure-summary sentinels, indentation preserved.
    pub failure_summary: Vec<String>,
    /// Everything else: log lines, tracebacks, harness chatter.
    pub payload: Vec<String>,
}

impl Transcript {
    /// Number of recognized protocol events.
    #[must_use]
    pub fn recognized_count(&self) -> usize {
        self.events.len()
    }

    /// Method names in the order their result events arrived, with status.
    #[must_use]
    pub fn results(&self) -> Vec<(&str, &TestEvent)> {
        self.events
            .iter()
            .filter_map(|e| e.method().map(|m| (m, e)))
            .collect()
    }
}

/// Section parser state.
enum Section {
    Normal,
    ExecLog,
    Summary,
}

/// Split a raw transcript into protocol events, execution log, failure
/// summary, and opaque payload.
#[must_use]
pub fn split_transcript(raw: &str) -> Transcript {
    let mut transcript = Transcript::default();
    let mut section = Section::Normal;

    for line in raw.lines() {
        let clean = line.trim();

        if clean == TEST_START_SENTINEL {
            section = Section::ExecLog;
            continue;
        }
        if clean == SUMMARY_START_SENTINEL {
            section = Section::Summary;
            continue;
        }
        if clean == SUMMARY_END_SENTINEL {
            section = Section::ExecLog;
            continue;
        }

        match section {
            Section::Summary => {
                // Indentation is meaningful here (Actual/Expected alignment).
                transcript.failure_summary.push(line.trim_end().to_string());
            }
            Section::Normal | Section::ExecLog => {
                if let Some(stmt) = clean.strip_prefix(EXEC_PREFIX) {
                    transcript.exec_log.push(stmt.to_string());
                    continue;
                }
                match decode_line(line) {
                    TestEvent::Unrecognized(raw_line) => transcript.payload.push(raw_line),
                    event => transcript.events.push(event),
                }
            }
        }
    }

    transcript
}

/// Check whether raw output carries crash markers.
///
/// Combined with zero recognized events this distinguishes "the harness
/// aborted before running any test" from "the file legitimately has no
/// tests".
#[must_use]
pub fn has_crash_markers(raw: &str) -> bool {
    raw.contains("Error") || raw.contains("Traceback (most recent call last)")
}
