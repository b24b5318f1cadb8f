//! vigil - Continuous test-watch dashboard
//!
//! A Rust watch loop for Python `unittest` projects: it fingerprints the
//! watched tree, reruns generated per-file test harnesses on change, renders
//! live pass/fail status with transition highlighting, and on demand drops
//! the user into an external debugger at the first failing test.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`] - Typed decoding of the harness line protocol
//! - [`harness`] - Sweep and isolated harness generation
//! - [`monitor`] - Content fingerprinting and change debouncing
//! - [`pipeline`] - The per-run execution state machine
//! - [`state`] - Cross-run result tracking and persistence
//! - [`analysis`] - Deep-dive analysis of the first failing test
//! - [`debug`] - Debug session preparation and the breakpoint store
//! - [`render`] - Incremental dashboard rendering
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil::config::WatchConfig;
//! use vigil::pipeline::{Pipeline, RunOutcome};
//! use vigil::state::StateTracker;
//!
//! let config = WatchConfig::load(".")?;
//! let pipeline = Pipeline::new(&config);
//! let mut tracker = StateTracker::from_persisted(pipeline.persistence().load()?);
//!
//! match pipeline.execute(&mut tracker)? {
//!     RunOutcome::Completed(snapshot) => println!("{} files", snapshot.files.len()),
//!     RunOutcome::SyntaxError(report) => eprintln!("blocked: {}", report.file.display()),
//!     RunOutcome::Crash(report) => eprintln!("crashed: {}", report.label),
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod debug;
pub mod error;
pub mod harness;
pub mod monitor;
pub mod pipeline;
pub mod protocol;
pub mod render;
pub mod state;

// Re-export commonly used types
pub use error::{Result, VigilError};

// Re-export config types
pub use config::{DebuggerKind, StopPolicy, WatchConfig, SCRATCH_DIR};

// Re-export protocol types
pub use protocol::{decode_line, has_crash_markers, split_transcript, TestEvent, Transcript};

// Re-export state types
pub use state::{RunState, StateTracker, TestIdentity, TestStatus};

// Re-export pipeline types
pub use pipeline::{CrashReport, Pipeline, RunOutcome, RunSnapshot, SyntaxReport};

// Re-export analysis types
pub use analysis::{DeepDive, DeepDiveAnalyzer, ErrorSummary, UserLocation};

// Re-export debug types
pub use debug::{
    breakpoints::{BreakpointRecord, BreakpointStore},
    reconcile_breakpoints, DebugSession, DebugSessionManager,
};
