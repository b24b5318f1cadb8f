//! Durable storage for run state.
//!
//! Both files are plain line-oriented text, fully rewritten after each
//! completed run. Writes go through a temp file + rename under an advisory
//! lock so a concurrent reader never observes a partially written file.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use super::{RunState, TestIdentity, TestStatus};
use crate::error::{Result, VigilError};

/// Status file: one `label::method=status` pair per line.
const STATUS_FILE: &str = ".status";

/// File-outcome file: one `label=1` per line for files with failures.
const FAILED_FILES_FILE: &str = ".failed_files";

/// Failed-only method list consumed by sweep harnesses.
const RUN_TESTS_FILE: &str = ".run_tests";

/// Lock file guarding rewrites.
const LOCK_FILE: &str = ".state.lock";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Persists run state into the scratch directory.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    dir: PathBuf,
}

impl StatePersistence {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    #[must_use]
    pub fn failed_files_path(&self) -> PathBuf {
        self.dir.join(FAILED_FILES_FILE)
    }

    #[must_use]
    pub fn run_tests_path(&self) -> PathBuf {
        self.dir.join(RUN_TESTS_FILE)
    }

    /// Load persisted state. Missing files yield an empty state; malformed
    /// lines are skipped with a warning rather than poisoning the run.
    pub fn load(&self) -> Result<RunState> {
        let mut state = RunState::default();

        if let Ok(raw) = fs::read_to_string(self.status_path()) {
            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed = line.split_once('=').and_then(|(id, status)| {
                    Some((TestIdentity::parse(id)?, TestStatus::parse(status)?))
                });
                match parsed {
                    Some((identity, status)) => {
                        state.statuses.insert(identity, status);
                    }
                    None => warn!("skipping malformed status line: {line}"),
                }
            }
        }

        if let Ok(raw) = fs::read_to_string(self.failed_files_path()) {
            for line in raw.lines() {
                let line = line.trim();
                if let Some((label, "1")) = line.split_once('=') {
                    state.failed_files.insert(label.to_string());
                } else if !line.is_empty() {
                    warn!("skipping malformed outcome line: {line}");
                }
            }
        }

        Ok(state)
    }

    /// Rewrite both persisted files atomically from the given state.
    pub fn save(&self, state: &RunState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = File::create(self.dir.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| VigilError::state(format!("failed to acquire state lock: {e}")))?;

        let mut status_lines = String::new();
        for (identity, status) in &state.statuses {
            status_lines.push_str(&format!("{identity}={}\n", status.as_str()));
        }
        write_atomic(&self.status_path(), &status_lines)?;

        let mut outcome_lines = String::new();
        for label in &state.failed_files {
            outcome_lines.push_str(&format!("{label}=1\n"));
        }
        write_atomic(&self.failed_files_path(), &outcome_lines)?;

        Ok(())
    }

    /// Write the failed-only method list read by sweep harnesses.
    pub fn write_run_tests(&self, methods: &BTreeSet<String>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut lines = String::new();
        for method in methods {
            lines.push_str(method);
            lines.push('\n');
        }
        write_atomic(&self.run_tests_path(), &lines)?;
        Ok(())
    }

    /// Remove the failed-only method list so the next sweep runs everything.
    pub fn clear_run_tests(&self) -> Result<()> {
        let path = self.run_tests_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Write content to a temp file, sync, then rename over the destination.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| VigilError::state(format!("invalid state path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!("{}{TMP_SUFFIX}", file_name.to_string_lossy()));
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(content.as_bytes())?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
