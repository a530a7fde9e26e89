//! Custom error types for modforge.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the build loop.
//!
//! The propagation policy is split in two tiers: tool-level failures
//! ([`ForgeError::is_tool_error`]) are converted to textual tool-output
//! messages and fed back into the conversation, where the model can recover
//! from them. Only fatal sentinels and attempt-budget exhaustion terminate
//! the retry loop and reach the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for modforge operations
#[derive(Error, Debug)]
pub enum ForgeError {
    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    /// Resolved path escapes the workspace root
    #[error("Access denied: path '{path}' resolves outside the workspace '{workspace}'")]
    PathTraversal { path: String, workspace: PathBuf },

    /// Write rejected by the constraint set (readonly file or outside allowed dirs)
    #[error("Access denied: {reason}")]
    PermissionDenied { reason: String },

    /// File or directory does not exist
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// Path exists but is not a regular file
    #[error("Path is not a file: {path}")]
    NotAFile { path: String },

    // =========================================================================
    // Edit Errors
    // =========================================================================
    /// `old_string` does not occur in the target file
    #[error("old_string not found in {path}")]
    EditTargetNotFound { path: String },

    /// `old_string` occurs more than once; the edit would be ambiguous
    #[error("old_string occurs {occurrences} times in {path}; provide more surrounding context to make it unique")]
    AmbiguousEdit { path: String, occurrences: usize },

    // =========================================================================
    // Tool Dispatch Errors
    // =========================================================================
    /// Argument payload could not be parsed even after the repair cascade
    #[error("Invalid arguments for tool '{tool}': {message}")]
    ArgumentParse { tool: String, message: String },

    /// Tool name is not in the dispatch table
    #[error("Tool '{tool}' not found")]
    ToolNotFound { tool: String },

    /// Operator refused the shell-command approval gate
    #[error("User denied command execution")]
    UserDenied,

    // =========================================================================
    // Build Loop Errors
    // =========================================================================
    /// Test oracle failed on every attempt within the budget
    #[error("Module build failed after {attempts} attempts")]
    BuildFailed { attempts: u32, output: String },

    /// Fatal defect in a readonly contract artifact; requires human correction
    #[error("Architect error (non-retryable): {reason}")]
    Architect { reason: String },

    /// Fatal defect in a dependency module; not fixable from this module
    #[error("Dependency error (non-retryable): {reason}")]
    Dependency { reason: String },

    // =========================================================================
    // Model Errors
    // =========================================================================
    /// Chat-completion transport failure
    #[error("Model communication failed: {message}")]
    ModelCommunication { message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load or validate configuration
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

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a permission-denied error
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an argument-parse error
    pub fn argument_parse(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentParse {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a tool-not-found error
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a model-communication error
    pub fn model(message: impl Into<String>) -> Self {
        Self::ModelCommunication {
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

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is a tool-level failure.
    ///
    /// Tool-level failures are converted to textual tool-output messages and
    /// fed back into the conversation; they never abort the process.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal { .. }
                | Self::PermissionDenied { .. }
                | Self::NotFound { .. }
                | Self::NotAFile { .. }
                | Self::EditTargetNotFound { .. }
                | Self::AmbiguousEdit { .. }
                | Self::ArgumentParse { .. }
                | Self::ToolNotFound { .. }
                | Self::UserDenied
                | Self::Io(_)
        )
    }

    /// Check if this error is retryable by the supervisor
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BuildFailed { .. })
    }

    /// Check if this error is fatal (halts the retry loop)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Architect { .. } | Self::Dependency { .. } | Self::Config { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Architect { .. } => 2,
            Self::Dependency { .. } => 3,
            Self::BuildFailed { .. } => 4,
            Self::Config { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for modforge results
pub type Result<T> = std::result::Result<T, ForgeError>;
