//! Change detection over the watched file set.
//!
//! The monitor computes a combined SHA-256 fingerprint over every watched
//! source file — root-level Python sources plus the active test directory —
//! and reports whether it differs from the previous check. The scratch
//! directory is excluded so harness generation and state commits never
//! retrigger a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use globset::{Glob, GlobMatcher};
use sha2::{Digest, Sha256};
use tracing::trace;
use walkdir::WalkDir;

use crate::config::SCRATCH_DIR;
use crate::error::Result;

/// Settle time after a detected change before re-fingerprinting, so a
/// half-written editor save sequence is never acted on.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// An opaque content fingerprint of the watched file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex digest, exposed for logging and tests.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.0
    }
}

/// Watches root-level sources and the active test directory.
#[derive(Debug, Clone)]
pub struct ChangeMonitor {
    project_root: PathBuf,
    test_dir: PathBuf,
    matcher: GlobMatcher,
}

impl ChangeMonitor {
    pub fn new(project_root: impl AsRef<Path>, test_dir: impl AsRef<Path>) -> Result<Self> {
        let matcher = Glob::new("*.py")
            .map_err(|e| crate::error::VigilError::config(e.to_string()))?
            .compile_matcher();
        Ok(Self {
            project_root: project_root.as_ref().to_path_buf(),
            test_dir: test_dir.as_ref().to_path_buf(),
            matcher,
        })
    }

    /// Compute the fingerprint of the current watched set.
    ///
    /// The digest covers each file's relative path, mtime, and size, so both
    /// edits and additions/removals change it. Entries are sorted first:
    /// directory walk order must not affect the result.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let mut entries: Vec<(String, u128, u64)> = Vec::new();

        for file in self.watched_files() {
            let Ok(meta) = fs::metadata(&file) else {
                // Deleted between listing and stat; the next check settles it.
                continue;
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());
            let rel = file
                .strip_prefix(&self.project_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .into_owned();
            entries.push((rel, mtime, meta.len()));
        }

        entries.sort();

        let mut hasher = Sha256::new();
        for (path, mtime, len) in &entries {
            hasher.update(path.as_bytes());
            hasher.update(mtime.to_le_bytes());
            hasher.update(len.to_le_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        trace!("fingerprint over {} files: {}", entries.len(), &digest[..12]);
        Ok(Fingerprint(digest))
    }

    /// Whether the watched set changed between two fingerprints.
    #[must_use]
    pub fn has_changed(previous: &Fingerprint, current: &Fingerprint) -> bool {
        previous != current
    }

    /// Wait out the debounce interval and return the settled fingerprint.
    pub fn settle(&self) -> Result<Fingerprint> {
        std::thread::sleep(DEBOUNCE);
        self.fingerprint()
    }

    /// Every watched file: root-level `*.py` plus the active test directory,
    /// excluding the scratch directory and hidden entries.
    #[must_use]
    pub fn watched_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.project_root) {
            for entry in entries.filter_map(std::result::Result::ok) {
                let path = entry.path();
                if path.is_file() && self.matches(&path) {
                    files.push(path);
                }
            }
        }

        if self.test_dir.is_dir() {
            for entry in WalkDir::new(&self.test_dir)
                .into_iter()
                .filter_entry(|e| !is_excluded(e.file_name().to_string_lossy().as_ref()))
                .filter_map(std::result::Result::ok)
            {
                let path = entry.path();
                if path.is_file() && self.matches(path) {
                    files.push(path.to_path_buf());
                }
            }
        }

        files
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(name))
    }
}

fn is_excluded(name: &str) -> bool {
    name == SCRATCH_DIR || name.starts_with('.') || name == "__pycache__"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn monitor_for(temp: &TempDir) -> ChangeMonitor {
        ChangeMonitor::new(temp.path(), temp.path().join("tests")).unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable_without_changes() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        std::fs::write(temp.path().join("tests/test_a.py"), "x = 1\n").unwrap();

        let monitor = monitor_for(&temp);
        let a = monitor.fingerprint().unwrap();
        let b = monitor.fingerprint().unwrap();
        assert!(!ChangeMonitor::has_changed(&a, &b));
    }

    #[test]
    fn test_fingerprint_changes_on_edit() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        let file = temp.path().join("tests/test_a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let monitor = monitor_for(&temp);
        let before = monitor.fingerprint().unwrap();
        // Content of a different length changes the size component even when
        // the filesystem's mtime granularity is coarse.
        std::fs::write(&file, "x = 1234\n").unwrap();
        let after = monitor.fingerprint().unwrap();

        assert!(ChangeMonitor::has_changed(&before, &after));
    }

    #[test]
    fn test_fingerprint_changes_on_new_file() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        std::fs::write(temp.path().join("tests/test_a.py"), "x = 1\n").unwrap();

        let monitor = monitor_for(&temp);
        let before = monitor.fingerprint().unwrap();
        std::fs::write(temp.path().join("tests/test_b.py"), "y = 2\n").unwrap();
        let after = monitor.fingerprint().unwrap();

        assert!(ChangeMonitor::has_changed(&before, &after));
    }

    #[test]
    fn test_scratch_dir_is_excluded() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        std::fs::write(temp.path().join("tests/test_a.py"), "x = 1\n").unwrap();
        std::fs::create_dir(temp.path().join("tests").join(SCRATCH_DIR)).unwrap();

        let monitor = monitor_for(&temp);
        let before = monitor.fingerprint().unwrap();
        std::fs::write(
            temp.path().join("tests").join(SCRATCH_DIR).join("gen.py"),
            "generated\n",
        )
        .unwrap();
        let after = monitor.fingerprint().unwrap();

        assert!(!ChangeMonitor::has_changed(&before, &after));
    }

    #[test]
    fn test_root_level_sources_are_watched() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("recursion.py"), "def f(): pass\n").unwrap();

        let monitor = monitor_for(&temp);
        let files = monitor.watched_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("recursion.py"));
    }

    #[test]
    fn test_non_python_files_ignored() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        std::fs::write(temp.path().join("tests/test_a.py"), "x = 1\n").unwrap();

        let monitor = monitor_for(&temp);
        let before = monitor.fingerprint().unwrap();
        std::fs::write(temp.path().join("tests/notes.md"), "scribbles\n").unwrap();
        let after = monitor.fingerprint().unwrap();

        assert!(!ChangeMonitor::has_changed(&before, &after));
    }

    #[test]
    fn test_missing_test_dir_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let monitor = monitor_for(&temp);
        assert!(monitor.fingerprint().is_ok());
        assert!(monitor.watched_files().is_empty());
    }
}
