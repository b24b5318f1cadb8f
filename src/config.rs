//! Configuration loading and validation.
//!
//! Configuration is layered: built-in defaults, then an optional `vigil.toml`
//! at the project root, then CLI overrides applied by the binary. The file
//! layer is optional by design — a project with no configuration at all gets
//! a working watch loop.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, VigilError};

/// Scratch directory for generated harnesses and persisted state.
/// Excluded from fingerprinting, syntax validation, and sweep discovery.
pub const SCRATCH_DIR: &str = "_vigil_";

/// Default test directory, used when no override or custom directory applies.
pub const DEFAULT_TEST_DIR: &str = "tests";

/// Custom test directory; takes precedence over the default when it
/// contains any Python source.
pub const CUSTOM_TEST_DIR: &str = "custom_tests";

/// Configuration file name at the project root.
const CONFIG_FILE: &str = "vigil.toml";

/// Sweep stopping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Abort the sweep once any test in the current file fails.
    #[default]
    FirstFailure,
    /// Continue through every file regardless of failures.
    RunAll,
}

/// Supported external debuggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebuggerKind {
    /// Full-screen console debugger (`pudb`).
    #[default]
    Pudb,
    /// `pdb++`, a drop-in replacement for the stdlib pdb.
    Pdbpp,
}

impl DebuggerKind {
    /// Module name as imported inside the injected bootstrap.
    pub fn module(&self) -> &'static str {
        match self {
            Self::Pudb => "pudb",
            Self::Pdbpp => "pdb",
        }
    }
}

/// Resolved watch configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Project root; all relative paths resolve against this.
    pub project_root: PathBuf,
    /// Explicit test directory override (`--dir`). Highest precedence.
    pub dir_override: Option<PathBuf>,
    /// Sweep stopping policy.
    pub stop_policy: StopPolicy,
    /// Restrict the next sweep to previously-failing files/tests.
    pub failed_only: bool,
    /// Per-test timeout in seconds; 0 disables the alarm.
    pub timeout_secs: u64,
    /// Whether file changes trigger reruns (false under `--no-refresh`).
    pub auto_refresh: bool,
    /// Debugger launched by the default debug keybinding.
    pub debugger: DebuggerKind,
    /// Python interpreter used for syntax checks, harnesses, and debuggers.
    pub python: String,
}

/// File-layer configuration (`vigil.toml`). All fields optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    watch: WatchSection,
}

#[derive(Debug, Default, Deserialize)]
struct WatchSection {
    stop_policy: Option<StopPolicy>,
    failed_only: Option<bool>,
    timeout_secs: Option<u64>,
    auto_refresh: Option<bool>,
    debugger: Option<DebuggerKind>,
    python: Option<String>,
    test_dir: Option<PathBuf>,
}

impl WatchConfig {
    /// Load configuration for a project: defaults merged with an optional
    /// `vigil.toml`. CLI overrides are applied afterwards via the `with_*`
    /// builders.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self> {
        let project_root = project_root.as_ref().to_path_buf();
        let mut config = Self {
            project_root: project_root.clone(),
            dir_override: None,
            stop_policy: StopPolicy::default(),
            failed_only: false,
            timeout_secs: 10,
            auto_refresh: true,
            debugger: DebuggerKind::default(),
            python: "python3".to_string(),
        };

        let config_path = project_root.join(CONFIG_FILE);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            let file: FileConfig = toml::from_str(&raw)
                .map_err(|e| VigilError::config_with_path(e.to_string(), config_path.clone()))?;
            debug!("loaded configuration from {}", config_path.display());

            let watch = file.watch;
            if let Some(policy) = watch.stop_policy {
                config.stop_policy = policy;
            }
            if let Some(failed_only) = watch.failed_only {
                config.failed_only = failed_only;
            }
            if let Some(timeout) = watch.timeout_secs {
                config.timeout_secs = timeout;
            }
            if let Some(auto) = watch.auto_refresh {
                config.auto_refresh = auto;
            }
            if let Some(debugger) = watch.debugger {
                config.debugger = debugger;
            }
            if let Some(python) = watch.python {
                config.python = python;
            }
            if let Some(dir) = watch.test_dir {
                config.dir_override = Some(dir);
            }
        }

        Ok(config)
    }

    // =========================================================================
    // CLI override builders
    // =========================================================================

    #[must_use]
    pub fn with_dir_override(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.dir_override = dir;
        }
        self
    }

    #[must_use]
    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    #[must_use]
    pub fn with_failed_only(mut self, failed_only: bool) -> Self {
        self.failed_only = failed_only;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, timeout: Option<u64>) -> Self {
        if let Some(timeout) = timeout {
            self.timeout_secs = timeout;
        }
        self
    }

    #[must_use]
    pub fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    #[must_use]
    pub fn with_debugger(mut self, debugger: Option<DebuggerKind>) -> Self {
        if let Some(debugger) = debugger {
            self.debugger = debugger;
        }
        self
    }

    // =========================================================================
    // Path resolution
    // =========================================================================

    /// The scratch directory for generated harnesses and persisted state.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.project_root.join(SCRATCH_DIR)
    }

    /// Resolve the active test directory.
    ///
    /// Precedence: explicit override, else `custom_tests/` when it contains
    /// any Python source, else `tests/`. Relative overrides resolve against
    /// the project root.
    #[must_use]
    pub fn active_test_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.dir_override {
            return if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_root.join(dir)
            };
        }

        let custom = self.project_root.join(CUSTOM_TEST_DIR);
        if dir_has_python_sources(&custom) {
            return custom;
        }

        self.project_root.join(DEFAULT_TEST_DIR)
    }
}

/// Check whether a directory contains at least one `.py` file.
fn dir_has_python_sources(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries
        .filter_map(std::result::Result::ok)
        .any(|e| e.path().extension().is_some_and(|ext| ext == "py"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_config_file() {
        let temp = TempDir::new().unwrap();
        let config = WatchConfig::load(temp.path()).unwrap();

        assert_eq!(config.stop_policy, StopPolicy::FirstFailure);
        assert!(!config.failed_only);
        assert_eq!(config.timeout_secs, 10);
        assert!(config.auto_refresh);
        assert_eq!(config.debugger, DebuggerKind::Pudb);
        assert_eq!(config.python, "python3");
    }

    #[test]
    fn test_loads_toml_layer() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("vigil.toml"),
            "[watch]\nstop_policy = \"run-all\"\ntimeout_secs = 3\ndebugger = \"pdbpp\"\n",
        )
        .unwrap();

        let config = WatchConfig::load(temp.path()).unwrap();
        assert_eq!(config.stop_policy, StopPolicy::RunAll);
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.debugger, DebuggerKind::Pdbpp);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("vigil.toml"), "watch = [[[").unwrap();

        let err = WatchConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, VigilError::Config { .. }));
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("vigil.toml"),
            "[watch]\nstop_policy = \"first-failure\"\n",
        )
        .unwrap();

        let config = WatchConfig::load(temp.path())
            .unwrap()
            .with_stop_policy(StopPolicy::RunAll)
            .with_timeout_secs(Some(1))
            .with_failed_only(true);

        assert_eq!(config.stop_policy, StopPolicy::RunAll);
        assert_eq!(config.timeout_secs, 1);
        assert!(config.failed_only);
    }

    #[test]
    fn test_active_dir_default() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();

        let config = WatchConfig::load(temp.path()).unwrap();
        assert_eq!(config.active_test_dir(), temp.path().join("tests"));
    }

    #[test]
    fn test_active_dir_prefers_nonempty_custom() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("tests")).unwrap();
        std::fs::create_dir(temp.path().join("custom_tests")).unwrap();
        std::fs::write(
            temp.path().join("custom_tests/test_mine.py"),
            "import unittest\n",
        )
        .unwrap();

        let config = WatchConfig::load(temp.path()).unwrap();
        assert_eq!(config.active_test_dir(), temp.path().join("custom_tests"));
    }

    #[test]
    fn test_active_dir_ignores_empty_custom() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("custom_tests")).unwrap();

        let config = WatchConfig::load(temp.path()).unwrap();
        assert_eq!(config.active_test_dir(), temp.path().join("tests"));
    }

    #[test]
    fn test_active_dir_explicit_override_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("custom_tests")).unwrap();
        std::fs::write(temp.path().join("custom_tests/test_x.py"), "x = 1\n").unwrap();

        let config = WatchConfig::load(temp.path())
            .unwrap()
            .with_dir_override(Some(PathBuf::from("exercises")));
        assert_eq!(config.active_test_dir(), temp.path().join("exercises"));
    }

    #[test]
    fn test_debugger_module_names() {
        assert_eq!(DebuggerKind::Pudb.module(), "pudb");
        assert_eq!(DebuggerKind::Pdbpp.module(), "pdb");
    }
}
