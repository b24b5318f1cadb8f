//! Deep-dive analysis of the first failing test.
//!
//! One extra isolated-harness execution yields everything the dashboard's
//! detail block and a later debug session need: the failure line inside the
//! harness, the originating user-code location when determinable, a source
//! excerpt bounded by the failing line, a structured error summary, and the
//! executed-statement log. Failures here degrade to notes — deep-dive never
//! disturbs the sweep's pass/fail accounting.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::config::WatchConfig;
use crate::error::{Result, VigilError};
use crate::harness::{defines_method, run_harness, HarnessGenerator};
use crate::protocol::split_transcript;
use crate::state::persistence::write_atomic;
use crate::state::TestIdentity;

/// Error summary file printed by a debug session on entry.
pub const ERROR_SUMMARY_FILE: &str = ".error_summary";

/// Structured error summary extracted from the failure-summary section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    /// Exception kind, e.g. `AssertionError`.
    pub kind: String,
    /// First line of the message; empty for expected/actual assertions.
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// A user-code location recovered from a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLocation {
    pub file: PathBuf,
    pub line: u32,
}

/// Everything the deep dive learned about the first failing test.
#[derive(Debug, Clone)]
pub struct DeepDive {
    pub identity: TestIdentity,
    /// Source file in the active test directory that defines the method.
    pub origin: PathBuf,
    /// The isolated harness that was executed.
    pub harness: PathBuf,
    /// Failure line inside the harness; 0 when not determinable.
    pub fail_line: u32,
    /// Deepest non-harness, non-stdlib frame, when one exists.
    pub user_location: Option<UserLocation>,
    /// Method source up to the failing line, failing line marked `--> `.
    pub excerpt: Vec<String>,
    pub summary: Option<ErrorSummary>,
    /// Executed statements from the `[EXE]` trace.
    pub exec_log: Vec<String>,
}

/// Runs the isolated harness once and extracts failure context.
#[derive(Debug)]
pub struct DeepDiveAnalyzer<'a> {
    config: &'a WatchConfig,
}

impl<'a> DeepDiveAnalyzer<'a> {
    #[must_use]
    pub fn new(config: &'a WatchConfig) -> Self {
        Self { config }
    }

    /// Analyze the given failing test.
    ///
    /// Returns [`VigilError::MethodNotFound`] when no file in the active
    /// test directory defines the method; the pipeline records a note and
    /// the run still commits.
    pub fn analyze(&self, identity: &TestIdentity) -> Result<DeepDive> {
        let active_dir = self.config.active_test_dir();
        let origin = find_origin(&active_dir, &identity.method)
            .ok_or_else(|| VigilError::method_not_found(&identity.method, &active_dir))?;

        let generator =
            HarnessGenerator::new(&self.config.project_root, self.config.scratch_dir());
        let harness = generator.isolated(&origin, &identity.method)?;

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

        let fail_line = extract_fail_line(&combined, &harness, &identity.method);
        let user_location = user_error_location(&combined, &harness);

        let harness_content = fs::read_to_string(&harness)?;
        let excerpt = source_excerpt(&harness_content, &identity.method, fail_line);

        let summary = parse_error_summary(&transcript.failure_summary);
        if !transcript.failure_summary.is_empty() {
            let path = self.config.scratch_dir().join(ERROR_SUMMARY_FILE);
            write_atomic(&path, &(transcript.failure_summary.join("\n") + "\n"))?;
        }

        debug!(
            "deep dive for {}: fail line {}, user location {:?}",
            identity, fail_line, user_location
        );

        Ok(DeepDive {
            identity: identity.clone(),
            origin,
            harness,
            fail_line,
            user_location,
            excerpt,
            summary,
            exec_log: transcript.exec_log,
        })
    }
}

/// Find the file in the active test directory defining `def <method>`.
///
/// Files are scanned in sorted order so the answer is deterministic when
/// two files define the same method name.
#[must_use]
pub fn find_origin(dir: &Path, method: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
        .collect();
    candidates.sort();

    candidates.into_iter().find(|path| {
        fs::read_to_string(path)
            .map(|content| defines_method(&content, method))
            .unwrap_or(false)
    })
}

fn frame_regex() -> Regex {
    Regex::new(r#"(?m)^\s*File "([^"]+)", line (\d+), in (.+?)\s*$"#).expect("valid frame regex")
}

/// Failure line inside the target file for the given method: the deepest
/// traceback frame whose basename and frame method both match. Returns 0
/// when no frame matches.
#[must_use]
pub fn extract_fail_line(text: &str, target: &Path, method: &str) -> u32 {
    let target_name = target.file_name().map(|n| n.to_string_lossy().into_owned());
    let Some(target_name) = target_name else {
        return 0;
    };

    frame_regex()
        .captures_iter(text)
        .filter(|cap| {
            let frame_file = Path::new(cap.get(1).map_or("", |m| m.as_str()));
            let frame_method = cap.get(3).map_or("", |m| m.as_str());
            frame_file
                .file_name()
                .is_some_and(|n| n.to_string_lossy() == target_name)
                && frame_method == method
        })
        .filter_map(|cap| cap.get(2)?.as_str().parse().ok())
        .last()
        .unwrap_or(0)
}

/// Deepest traceback frame that is neither the harness nor stdlib /
/// third-party code — the place in the user's own code where the error
/// originated.
#[must_use]
pub fn user_error_location(text: &str, harness: &Path) -> Option<UserLocation> {
    let harness_name = harness.file_name()?.to_string_lossy().into_owned();

    frame_regex()
        .captures_iter(text)
        .filter_map(|cap| {
            let file = cap.get(1)?.as_str();
            let line: u32 = cap.get(2)?.as_str().parse().ok()?;
            Some((file.to_string(), line))
        })
        .filter(|(file, _)| {
            let path = Path::new(file);
            !file.starts_with('<')
                && !file.contains("/lib/python")
                && !file.contains("site-packages")
                && !file.contains("dist-packages")
                && path
                    .file_name()
                    .is_none_or(|n| n.to_string_lossy() != harness_name)
        })
        .last()
        .map(|(file, line)| UserLocation {
            file: PathBuf::from(file),
            line,
        })
}

/// Extract the method's source bounded by the failing line.
///
/// Lines are dedented to the method's own indentation and the failing line
/// is marked with `--> `; with no usable failing line the whole method body
/// is returned.
#[must_use]
pub fn source_excerpt(content: &str, method: &str, fail_line: u32) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let def_re = match Regex::new(&format!(r"^\s*def\s+{}\s*\(", regex::escape(method))) {
        Ok(re) => re,
        Err(_) => return vec!["Method source not found.".to_string()],
    };
    let Some(def_idx) = lines.iter().position(|l| def_re.is_match(l)) else {
        return vec!["Method source not found.".to_string()];
    };

    let fail_idx = fail_line as usize;
    let mut end = if fail_idx > def_idx && fail_idx <= lines.len() {
        fail_idx
    } else {
        method_end(&lines, def_idx)
    };
    while end > def_idx + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }

    let slice = &lines[def_idx..end];
    let indent = slice
        .first()
        .map_or(0, |l| l.len() - l.trim_start().len());

    slice
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let dedented = line.get(indent..).unwrap_or_else(|| line.trim_start());
            if fail_idx > 0 && def_idx + i + 1 == fail_idx {
                format!("--> {dedented}")
            } else {
                format!("    {dedented}")
            }
        })
        .collect()
}

/// First line past the method body: the next non-empty line indented at or
/// below the `def` itself.
fn method_end(lines: &[&str], def_idx: usize) -> usize {
    let def_indent = lines[def_idx].len() - lines[def_idx].trim_start().len();
    for (offset, line) in lines[def_idx + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent <= def_indent {
            return def_idx + 1 + offset;
        }
    }
    lines.len()
}

/// Parse the failure-summary section into a structured summary.
#[must_use]
pub fn parse_error_summary(lines: &[String]) -> Option<ErrorSummary> {
    let kind_re =
        Regex::new(r"^(\w+(?:Error|Exception|Interrupt|Iteration|Exit)):\s*(.*)$").ok()?;

    let mut summary: Option<ErrorSummary> = None;
    for line in lines {
        let trimmed = line.trim();
        if let Some(cap) = kind_re.captures(trimmed) {
            summary = Some(ErrorSummary {
                kind: cap[1].to_string(),
                message: cap[2].trim().to_string(),
                expected: None,
                actual: None,
            });
            continue;
        }
        if let Some(ref mut s) = summary {
            if let Some(rest) = trimmed.strip_prefix("Actual:") {
                s.actual = Some(rest.trim().to_string());
            } else if let Some(rest) = trimmed.strip_prefix("Expected:") {
                s.expected = Some(rest.trim().to_string());
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TRACEBACK: &str = r#"Traceback (most recent call last):
  File "/proj/_vigil_/debug_this_test.py", line 42, in <module>
    _func()
  File "/proj/_vigil_/debug_this_test.py", line 18, in test_reduce
    self.assertEqual(fib(5), 5)
  File "/proj/recursion.py", line 7, in fib
    return fib(n) + fib(n - 2)
RecursionError: maximum recursion depth exceeded
"#;

    // ------------------------------------------------------------------------
    // Traceback Extraction Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_extract_fail_line_matches_file_and_method() {
        let harness = Path::new("/proj/_vigil_/debug_this_test.py");
        assert_eq!(extract_fail_line(TRACEBACK, harness, "test_reduce"), 18);
    }

    #[test]
    fn test_extract_fail_line_takes_deepest_match() {
        let text = r#"  File "t.py", line 5, in test_x
  File "t.py", line 9, in test_x
"#;
        assert_eq!(extract_fail_line(text, Path::new("t.py"), "test_x"), 9);
    }

    #[test]
    fn test_extract_fail_line_zero_when_absent() {
        assert_eq!(
            extract_fail_line(TRACEBACK, Path::new("other.py"), "test_reduce"),
            0
        );
        assert_eq!(extract_fail_line("no frames here", Path::new("t.py"), "m"), 0);
    }

    #[test]
    fn test_user_error_location_skips_harness_and_stdlib() {
        let harness = Path::new("/proj/_vigil_/debug_this_test.py");
        let loc = user_error_location(TRACEBACK, harness).unwrap();
        assert_eq!(loc.file, PathBuf::from("/proj/recursion.py"));
        assert_eq!(loc.line, 7);
    }

    #[test]
    fn test_user_error_location_none_for_test_only_failure() {
        let text = r#"  File "/proj/_vigil_/debug_this_test.py", line 18, in test_reduce
  File "/usr/lib/python3.11/unittest/case.py", line 100, in assertEqual
  File "<string>", line 1, in <module>
"#;
        let harness = Path::new("/proj/_vigil_/debug_this_test.py");
        assert!(user_error_location(text, harness).is_none());
    }

    // ------------------------------------------------------------------------
    // Source Excerpt Tests
    // ------------------------------------------------------------------------

    const METHOD_SOURCE: &str = "\
import unittest

class TestFib(unittest.TestCase):
    def test_reduce(self):
        n = 5
        result = fib(n)
        self.assertEqual(result, 5)

    def test_other(self):
        pass
";

    #[test]
    fn test_excerpt_bounded_by_fail_line() {
        // Line 6 is `result = fib(n)`.
        let excerpt = source_excerpt(METHOD_SOURCE, "test_reduce", 6);
        assert_eq!(
            excerpt,
            vec![
                "    def test_reduce(self):",
                "        n = 5",
                "-->     result = fib(n)",
            ]
        );
    }

    #[test]
    fn test_excerpt_whole_method_when_line_unknown() {
        let excerpt = source_excerpt(METHOD_SOURCE, "test_reduce", 0);
        assert_eq!(excerpt.len(), 4);
        assert!(excerpt.iter().all(|l| l.starts_with("    ")));
        assert!(!excerpt.iter().any(|l| l.contains("test_other")));
    }

    #[test]
    fn test_excerpt_method_missing() {
        let excerpt = source_excerpt(METHOD_SOURCE, "test_absent", 0);
        assert_eq!(excerpt, vec!["Method source not found.".to_string()]);
    }

    // ------------------------------------------------------------------------
    // Error Summary Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_summary_with_expected_actual() {
        let lines = vec![
            "test_sum.py:12 in test_total".to_string(),
            "    self.assertEqual(total(xs), 15)".to_string(),
            "AssertionError:".to_string(),
            "  Actual:   10".to_string(),
            "  Expected: 15".to_string(),
        ];
        let summary = parse_error_summary(&lines).unwrap();
        assert_eq!(summary.kind, "AssertionError");
        assert_eq!(summary.actual.as_deref(), Some("10"));
        assert_eq!(summary.expected.as_deref(), Some("15"));
    }

    #[test]
    fn test_parse_summary_plain_error() {
        let lines = vec!["TypeError: unsupported operand type(s)".to_string()];
        let summary = parse_error_summary(&lines).unwrap();
        assert_eq!(summary.kind, "TypeError");
        assert_eq!(summary.message, "unsupported operand type(s)");
        assert!(summary.expected.is_none());
    }

    #[test]
    fn test_parse_summary_ignores_frame_lines() {
        let lines = vec![
            "test_fib.py:9 in test_base".to_string(),
            "    assert fib(0) == 0".to_string(),
        ];
        assert!(parse_error_summary(&lines).is_none());
    }

    // ------------------------------------------------------------------------
    // Origin Search Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_find_origin() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("test_a.py"),
            "def test_alpha(self):\n    pass\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("test_b.py"),
            "def test_beta(self):\n    pass\n",
        )
        .unwrap();

        let origin = find_origin(temp.path(), "test_beta").unwrap();
        assert!(origin.ends_with("test_b.py"));
        assert!(find_origin(temp.path(), "test_gamma").is_none());
    }
}
