//! Harness generation.
//!
//! A harness is a standalone, directly executable Python file assembled from
//! the user's test source plus embedded runner fragments. Two flavors exist:
//!
//! - **sweep** — runs every test method in the file and keeps going past
//!   failures; used by the dashboard. It must never abort the process on a
//!   failing test.
//! - **isolated** — runs exactly one named method and re-raises on failure
//!   so a full traceback reaches the caller; used by deep-dive and debug
//!   sessions.

pub mod templates;

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{Result, VigilError};

/// Default name of the isolated harness file inside the scratch directory.
pub const ISOLATED_HARNESS_NAME: &str = "debug_this_test.py";

/// Generates harness files into the project's scratch directory.
#[derive(Debug, Clone)]
pub struct HarnessGenerator {
    project_root: PathBuf,
    scratch_dir: PathBuf,
}

impl HarnessGenerator {
    #[must_use]
    pub fn new(project_root: impl AsRef<Path>, scratch_dir: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
        }
    }

    /// Build a sweep harness for a test source file.
    ///
    /// The single-method default output name is replaced with a per-sweep
    /// name derived from the source stem, so sweep artifacts of different
    /// files never collide with each other or with the isolated harness.
    pub fn sweep(&self, source: &Path) -> Result<PathBuf> {
        let dest = self
            .scratch_dir
            .join(format!("sweep_{}.py", file_label(source)));
        let rendered = self.render(source, templates::SWEEP_RUNNER, None)?;
        fs::create_dir_all(&self.scratch_dir)?;
        fs::write(&dest, rendered)?;
        debug!("generated sweep harness {}", dest.display());
        Ok(dest)
    }

    /// Build an isolated harness that runs exactly one named test method.
    ///
    /// Returns [`VigilError::MethodNotFound`] when the source file does not
    /// define the method; callers degrade to a note instead of crashing.
    pub fn isolated(&self, source: &Path, method: &str) -> Result<PathBuf> {
        let content = fs::read_to_string(source)?;
        if !defines_method(&content, method) {
            return Err(VigilError::method_not_found(method, source));
        }

        let dest = self.scratch_dir.join(ISOLATED_HARNESS_NAME);
        let rendered = self.render(source, templates::ISOLATED_RUNNER, Some(method))?;
        fs::create_dir_all(&self.scratch_dir)?;
        fs::write(&dest, rendered)?;
        debug!(
            "generated isolated harness {} for {}",
            dest.display(),
            method
        );
        Ok(dest)
    }

    /// Assemble path setup + timeout helper + cleaned source + runner.
    fn render(&self, source: &Path, runner: &str, method: Option<&str>) -> Result<String> {
        let content = fs::read_to_string(source)?;
        let cleaned = strip_main_block(&content);

        let test_dir = source
            .parent()
            .map_or_else(|| self.project_root.clone(), Path::to_path_buf);
        let target = match method {
            Some(m) => format!("'{m}'"),
            None => "None".to_string(),
        };

        let mut out = String::new();
        out.push_str(
            &templates::PATH_SETUP
                .replace("__VIGIL_ROOT__", &self.project_root.to_string_lossy())
                .replace("__VIGIL_TEST_DIR__", &test_dir.to_string_lossy()),
        );
        out.push_str(templates::TIMEOUT_HELPER);
        out.push('\n');
        out.push_str(&cleaned);
        out.push_str(
            &runner
                .replace("__VIGIL_TARGET__", &target)
                .replace("__VIGIL_SCRATCH__", &self.scratch_dir.to_string_lossy()),
        );
        Ok(out)
    }
}

/// Run a harness to completion, capturing its output.
///
/// The per-test timeout travels over the `VIGIL_TIMEOUT` env var; the
/// harness enforces it in-process via SIGALRM. A spawn failure maps to
/// [`VigilError::MissingTool`] so callers can tell "no interpreter" apart
/// from a failing harness.
pub fn run_harness(
    python: &str,
    harness: &Path,
    project_root: &Path,
    timeout_secs: u64,
) -> Result<std::process::Output> {
    std::process::Command::new(python)
        .arg(harness)
        .current_dir(project_root)
        .env("VIGIL_TIMEOUT", timeout_secs.to_string())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VigilError::MissingTool {
                    tool: python.to_string(),
                }
            } else {
                VigilError::tool(python, e.to_string())
            }
        })
}

/// File label used across status maps and the dashboard: the source stem.
#[must_use]
pub fn file_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Check whether the source defines `def <method>(`.
#[must_use]
pub fn defines_method(content: &str, method: &str) -> bool {
    let pattern = format!(r"(?m)^\s*def\s+{}\s*\(", regex::escape(method));
    Regex::new(&pattern).map(|re| re.is_match(content)).unwrap_or(false)
}

/// Drop everything from the source's own `if __name__ == '__main__':` block
/// onward; the runner fragment supplies its own.
#[must_use]
pub fn strip_main_block(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("if __name__") && trimmed.contains("__main__") {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}
