//! Custom error types for vigil.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the watch loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    // =========================================================================
    // Run-blocking Errors
    // =========================================================================
    /// A candidate source file failed to compile; the run is blocked and the
    /// previous snapshot is preserved.
    #[error("Syntax error in {file}: {detail}")]
    Syntax { file: PathBuf, detail: String },

    /// A harness produced no recognized events but its output carried error
    /// markers; the run is blocked and the previous snapshot is preserved.
    #[error("Harness for '{label}' crashed before running any test: {detail}")]
    Crash { label: String, detail: String },

    // =========================================================================
    // Degradable Errors
    // =========================================================================
    /// The named test method was not found in the candidate source file
    #[error("Method '{method}' not found in {file}")]
    MethodNotFound { method: String, file: PathBuf },

    /// Debug-session preparation failed at the given stage
    #[error("Debug session build failed during {stage}: {message}")]
    Builder { stage: String, message: String },

    /// Breakpoint injection failed; callers fall back to an unconditional break
    #[error("Breakpoint injection failed: {reason}")]
    Injection { reason: String },

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// Tool execution failed
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    // =========================================================================
    // State Errors
    // =========================================================================
    /// Persisted state could not be read or rewritten
    #[error("State persistence error: {message}")]
    State { message: String },

    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a syntax error
    pub fn syntax(file: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Syntax {
            file: file.into(),
            detail: detail.into(),
        }
    }

    /// Create a crash error
    pub fn crash(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Crash {
            label: label.into(),
            detail: detail.into(),
        }
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
            file: file.into(),
        }
    }

    /// Create a builder error
    pub fn builder(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Builder {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create an injection error
    pub fn injection(reason: impl Into<String>) -> Self {
        Self::Injection {
            reason: reason.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a tool execution error
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error blocks the current run (previous snapshot is kept,
    /// no state is committed).
    pub fn blocks_run(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::Crash { .. })
    }

    /// Check if this error degrades to a note instead of failing the run.
    pub fn degrades(&self) -> bool {
        matches!(
            self,
            Self::MethodNotFound { .. } | Self::Builder { .. } | Self::Injection { .. }
        )
    }

    /// Check if this error should terminate the watch process. Only a missing
    /// interpreter qualifies; everything else leaves the dashboard usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTool { .. })
    }
}

/// Type alias for vigil results
pub type Result<T> = std::result::Result<T, VigilError>;
