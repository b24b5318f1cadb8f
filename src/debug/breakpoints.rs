//! The persisted breakpoint store.
//!
//! One record per line, `path:line` or a bare `path`. The file is owned by
//! the user and the external debuggers; vigil exposes only a narrow
//! contract — list, append, remove-by-path-prefix — and preserves any line
//! it cannot parse. Rewrites are atomic so a debugger reading the store at
//! startup never observes a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::state::persistence::write_atomic;

/// Breakpoint store file inside the scratch directory.
pub const BREAKPOINT_FILE: &str = ".manual_breakpoints";

/// One breakpoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRecord {
    pub path: PathBuf,
    /// Absent for a bare-path record (break anywhere in the file).
    pub line: Option<u32>,
}

impl BreakpointRecord {
    /// Parse a `path:line` or bare `path` line.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some((path, line)) = raw.rsplit_once(':') {
            if let Ok(line) = line.parse::<u32>() {
                return Some(Self {
                    path: PathBuf::from(path),
                    line: Some(line),
                });
            }
        }
        Some(Self {
            path: PathBuf::from(raw),
            line: None,
        })
    }

    #[must_use]
    pub fn serialize(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.path.display()),
            None => self.path.display().to_string(),
        }
    }
}

/// File-backed breakpoint store.
#[derive(Debug, Clone)]
pub struct BreakpointStore {
    path: PathBuf,
}

impl BreakpointStore {
    #[must_use]
    pub fn new(scratch_dir: impl AsRef<Path>) -> Self {
        Self {
            path: scratch_dir.as_ref().join(BREAKPOINT_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All parseable records. A missing store is an empty store.
    pub fn list(&self) -> Result<Vec<BreakpointRecord>> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Ok(Vec::new());
        };
        Ok(raw.lines().filter_map(BreakpointRecord::parse).collect())
    }

    /// Append a record.
    pub fn append(&self, path: &Path, line: Option<u32>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = BreakpointRecord {
            path: path.to_path_buf(),
            line,
        };
        let mut raw = fs::read_to_string(&self.path).unwrap_or_default();
        if !raw.is_empty() && !raw.ends_with('\n') {
            raw.push('\n');
        }
        raw.push_str(&record.serialize());
        raw.push('\n');
        write_atomic(&self.path, &raw)?;
        Ok(())
    }

    /// Remove every record whose path starts with `prefix`. Lines that do
    /// not parse as records are kept verbatim — the store has other owners.
    pub fn remove_for_prefix(&self, prefix: &Path) -> Result<usize> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Ok(0);
        };

        let mut kept = Vec::new();
        let mut removed = 0;
        for line in raw.lines() {
            match BreakpointRecord::parse(line) {
                Some(record) if record.path.starts_with(prefix) => removed += 1,
                _ => kept.push(line),
            }
        }

        if removed > 0 {
            let mut content = kept.join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            write_atomic(&self.path, &content)?;
        }
        Ok(removed)
    }
}
