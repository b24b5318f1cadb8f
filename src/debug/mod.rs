//! Debug session preparation and launch.
//!
//! A session isolates one failing test, injects a debugger bootstrap at the
//! failure site, and hands the terminal to the external debugger process.
//! Every failure on the way degrades rather than stranding the user: if
//! precise injection is impossible the harness gets an unconditional break
//! at the top, so a debugger always comes up.

pub mod breakpoints;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::analysis::{
    extract_fail_line, find_origin, user_error_location, UserLocation, ERROR_SUMMARY_FILE,
};
use crate::config::{DebuggerKind, WatchConfig};
use crate::error::{Result, VigilError};
use crate::harness::{run_harness, HarnessGenerator};
use crate::state::persistence::write_atomic;
use crate::state::TestIdentity;
use breakpoints::{BreakpointRecord, BreakpointStore};

/// Persisted debug target, read by breakpoint reconciliation.
pub const DEBUG_TARGET_FILE: &str = ".debug_target";

/// One interactive debugger invocation.
#[derive(Debug, Clone)]
pub struct DebugSession {
    pub identity: TestIdentity,
    pub harness: PathBuf,
    /// Failure line inside the harness; 0 when not determinable.
    pub fail_line: u32,
    pub user_location: Option<UserLocation>,
}

/// The durably recorded target of the most recent debug session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugTarget {
    pub identity: TestIdentity,
    pub harness: PathBuf,
    pub user_file: Option<PathBuf>,
}

/// Prepares and launches debug sessions.
#[derive(Debug)]
pub struct DebugSessionManager<'a> {
    config: &'a WatchConfig,
}

impl<'a> DebugSessionManager<'a> {
    #[must_use]
    pub fn new(config: &'a WatchConfig) -> Self {
        Self { config }
    }

    /// Build the isolated harness, position a breakpoint at the failure
    /// site, and hand control to the debugger. Blocks until the debugger
    /// exits; the caller takes a fresh run afterwards.
    pub fn launch(&self, identity: &TestIdentity, kind: DebuggerKind) -> Result<()> {
        let scratch = self.config.scratch_dir();
        let store = BreakpointStore::new(&scratch);

        let active_dir = self.config.active_test_dir();
        let origin = find_origin(&active_dir, &identity.method)
            .ok_or_else(|| VigilError::method_not_found(&identity.method, &active_dir))?;

        let generator =
            HarnessGenerator::new(&self.config.project_root, &scratch);
        let harness = generator.isolated(&origin, &identity.method)?;

        // Line numbers in a freshly regenerated harness are not stable, so
        // records pointing at the old harness are stale by definition.
        store.remove_for_prefix(&harness)?;

        let output = run_harness(
            &self.config.python,
            &harness,
            &self.config.project_root,
            self.config.timeout_secs,
        )
        .map_err(|e| VigilError::builder("locate failure", e.to_string()))?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        let session = DebugSession {
            identity: identity.clone(),
            harness: harness.clone(),
            fail_line: extract_fail_line(&combined, &harness, &identity.method),
            user_location: user_error_location(&combined, &harness),
        };

        let manual = store.list()?;
        if let Err(e) = self.inject(&session, kind, &manual) {
            warn!("breakpoint injection failed ({e}); falling back to top-of-file break");
            // The failed injection may have left the harness unparseable;
            // regenerate before the fallback edit.
            generator.isolated(&origin, &identity.method)?;
            self.inject_fallback(&session, kind, &manual)?;
        }

        self.write_debug_target(&session)?;

        info!("launching {:?} for {}", kind, identity);
        let status = std::process::Command::new(&self.config.python)
            .arg(&session.harness)
            .current_dir(&self.config.project_root)
            .env("VIGIL_DEBUG", "1")
            .status()
            .map_err(|e| VigilError::builder("launch debugger", e.to_string()))?;
        debug!("debugger exited with {status}");

        Ok(())
    }

    /// Inject the bootstrap at the start of the target method body.
    fn inject(
        &self,
        session: &DebugSession,
        kind: DebuggerKind,
        manual: &[BreakpointRecord],
    ) -> Result<()> {
        let content = fs::read_to_string(&session.harness)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();

        // @timeout lines vanishing above the failure site shift it up.
        let removed_before = lines
            .iter()
            .take(session.fail_line.saturating_sub(1) as usize)
            .filter(|l| is_timeout_decorator(l))
            .count() as u32;

        let cleaned = neutralize_alarms(&strip_timeout_decorators(&lines));

        let (body_idx, pad) = find_injection_point(&cleaned, &session.identity.method)
            .ok_or_else(|| {
                VigilError::injection(format!(
                    "method body for '{}' not found in harness",
                    session.identity.method
                ))
            })?;

        // +1 for the bootstrap line itself, inserted above the fail line.
        let bp_target = (session.fail_line > removed_before)
            .then(|| session.fail_line - removed_before + 1);

        let bootstrap = bootstrap_line(
            kind,
            &session.harness,
            bp_target,
            session.user_location.as_ref(),
            manual,
            &self.config.scratch_dir().join(ERROR_SUMMARY_FILE),
        );

        let mut result = cleaned;
        result.insert(body_idx, format!("{pad}{bootstrap}"));
        fs::write(&session.harness, result.join("\n") + "\n")?;

        self.verify_compiles(&session.harness)
    }

    /// Last resort: unconditional break at the top of the harness.
    fn inject_fallback(
        &self,
        session: &DebugSession,
        kind: DebuggerKind,
        manual: &[BreakpointRecord],
    ) -> Result<()> {
        let content = fs::read_to_string(&session.harness)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let cleaned = neutralize_alarms(&strip_timeout_decorators(&lines));

        let bootstrap = bootstrap_line(
            kind,
            &session.harness,
            None,
            session.user_location.as_ref(),
            manual,
            &self.config.scratch_dir().join(ERROR_SUMMARY_FILE),
        );

        let mut result = cleaned;
        result.insert(0, bootstrap);
        fs::write(&session.harness, result.join("\n") + "\n")?;

        self.verify_compiles(&session.harness)
            .map_err(|e| VigilError::injection(format!("fallback injection failed: {e}")))
    }

    fn verify_compiles(&self, harness: &Path) -> Result<()> {
        let output = std::process::Command::new(&self.config.python)
            .args(["-m", "py_compile"])
            .arg(harness)
            .output()
            .map_err(|e| VigilError::tool(&self.config.python, e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(VigilError::injection(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }

    /// Persist the debug target so reconciliation works across restarts.
    fn write_debug_target(&self, session: &DebugSession) -> Result<()> {
        let mut content = format!("{}\n{}\n", session.identity, session.harness.display());
        if let Some(ref loc) = session.user_location {
            content.push_str(&format!("{}:{}\n", loc.file.display(), loc.line));
        }
        write_atomic(&self.config.scratch_dir().join(DEBUG_TARGET_FILE), &content)
    }
}

/// Remove stale breakpoints once the previously-debugged test is clean.
///
/// Reads the persisted debug target; when its identity is no longer in the
/// failing set, records pointing at the isolated harness and the recorded
/// user-code file are removed and the target is forgotten. Records for
/// other files are never touched.
pub fn reconcile_breakpoints(
    scratch_dir: &Path,
    failing: &BTreeSet<TestIdentity>,
) -> Result<()> {
    let target_path = scratch_dir.join(DEBUG_TARGET_FILE);
    let Some(target) = read_debug_target(&target_path) else {
        return Ok(());
    };

    if failing.contains(&target.identity) {
        return Ok(());
    }

    let store = BreakpointStore::new(scratch_dir);
    let mut removed = store.remove_for_prefix(&target.harness)?;
    if let Some(ref user_file) = target.user_file {
        removed += store.remove_for_prefix(user_file)?;
    }
    fs::remove_file(&target_path)?;
    debug!(
        "reconciled {} breakpoint record(s) for now-passing {}",
        removed, target.identity
    );
    Ok(())
}

/// Read the persisted debug target, if any.
#[must_use]
pub fn read_debug_target(path: &Path) -> Option<DebugTarget> {
    let raw = fs::read_to_string(path).ok()?;
    let mut lines = raw.lines();
    let identity = TestIdentity::parse(lines.next()?)?;
    let harness = PathBuf::from(lines.next()?);
    let user_file = lines.next().and_then(|l| {
        let record = BreakpointRecord::parse(l)?;
        Some(record.path)
    });
    Some(DebugTarget {
        identity,
        harness,
        user_file,
    })
}

// ============================================================================
// Source Surgery
// ============================================================================

fn timeout_decorator_regex() -> Regex {
    Regex::new(r"^\s*@timeout\b").expect("valid decorator regex")
}

fn is_timeout_decorator(line: &str) -> bool {
    timeout_decorator_regex().is_match(line)
}

/// Drop every `@timeout` decorator line.
#[must_use]
pub fn strip_timeout_decorators(lines: &[String]) -> Vec<String> {
    let re = timeout_decorator_regex();
    lines.iter().filter(|l| !re.is_match(l)).cloned().collect()
}

/// Replace every `signal.alarm(...)` with `signal.alarm(0)` so no pending
/// alarm can fire mid-session.
#[must_use]
pub fn neutralize_alarms(lines: &[String]) -> Vec<String> {
    let re = Regex::new(r"signal\.alarm\([^)]*\)").expect("valid alarm regex");
    lines
        .iter()
        .map(|l| re.replace_all(l, "signal.alarm(0)").into_owned())
        .collect()
}

/// Locate the first body line of `def <method>` and its indentation.
#[must_use]
pub fn find_injection_point(lines: &[String], method: &str) -> Option<(usize, String)> {
    let def_re = Regex::new(&format!(r"^\s*def\s+{}\s*\(", regex::escape(method))).ok()?;
    let def_idx = lines.iter().position(|l| def_re.is_match(l))?;
    let def_indent = indent_of(&lines[def_idx]);

    for (offset, line) in lines[def_idx + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        if indent <= def_indent {
            return None;
        }
        return Some((def_idx + 1 + offset, line[..indent].to_string()));
    }
    None
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// The one-line debugger bootstrap inserted into the harness.
fn bootstrap_line(
    kind: DebuggerKind,
    harness: &Path,
    bp_target: Option<u32>,
    user_location: Option<&UserLocation>,
    manual: &[BreakpointRecord],
    error_summary: &Path,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    match kind {
        DebuggerKind::Pudb => {
            parts.push("import pudb".to_string());
            parts.push("_dbg = pudb._get_debugger()".to_string());
        }
        DebuggerKind::Pdbpp => {
            parts.push("import pdb".to_string());
            parts.push(
                "hasattr(pdb, 'DefaultConfig') and setattr(pdb.DefaultConfig, 'sticky_by_default', True)"
                    .to_string(),
            );
            parts.push("_dbg = pdb.Pdb()".to_string());
        }
    }

    if let Some(line) = bp_target {
        parts.push(format!("_dbg.set_break(r'{}', {line})", harness.display()));
    }
    if let Some(loc) = user_location {
        parts.push(format!(
            "_dbg.set_break(r'{}', {})",
            loc.file.display(),
            loc.line
        ));
    }
    for record in manual {
        if let Some(line) = record.line {
            parts.push(format!(
                "_dbg.set_break(r'{}', {line})",
                record.path.display()
            ));
        }
    }

    parts.push(format!(
        "import os as _os; _es = r'{}'; _os.path.exists(_es) and print(open(_es).read())",
        error_summary.display()
    ));
    parts.push(format!("{}.set_trace()", kind.module()));

    parts.join("; ")
}
