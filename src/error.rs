//! Error handling for PT-STEM
//!
//! One error type for the whole crate. Per-snapshot failures are absorbed
//! by the export pipeline; everything else propagates to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for PT-STEM operations
pub type Result<T> = std::result::Result<T, PtStemError>;

/// Main error type for PT-STEM operations
#[derive(Error, Debug)]
pub enum PtStemError {
    // Connection Errors
    #[error("Not connected to a DAW session: {reason}")]
    Connection { reason: String },

    #[error("Bridge error: {message}")]
    Bridge { message: String },

    // Validation Errors
    #[error("Invalid export request: {reason}")]
    Validation { reason: String },

    #[error("Cannot create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Per-snapshot Errors
    #[error("Track mutation failed for '{track}': {reason}")]
    TrackMutation { track: String, reason: String },

    #[error("Render failed: {reason}")]
    Render { reason: String },

    #[error("Rendered file not found: {path}")]
    FileMissing { path: PathBuf },

    #[error("Failed to move {from} to {to}: {source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Task Errors
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task {task_id} is {status}: {reason}")]
    InvalidState {
        task_id: String,
        status: String,
        reason: String,
    },

    #[error("Export pipeline error: {reason}")]
    Pipeline { reason: String },

    // Configuration Errors
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PtStemError {
    pub fn connection(reason: impl Into<String>) -> Self {
        PtStemError::Connection {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        PtStemError::Validation {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            PtStemError::Connection { .. } => "CONNECTION_ERROR",
            PtStemError::Bridge { .. } => "BRIDGE_ERROR",
            PtStemError::Validation { .. } => "VALIDATION_ERROR",
            PtStemError::OutputDirectory { .. } => "VALIDATION_ERROR",
            PtStemError::TrackMutation { .. } => "TRACK_MUTATION_FAILED",
            PtStemError::Render { .. } => "RENDER_FAILED",
            PtStemError::FileMissing { .. } => "FILE_MISSING",
            PtStemError::Relocate { .. } => "RELOCATE_FAILED",
            PtStemError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            PtStemError::InvalidState { .. } => "INVALID_STATE",
            PtStemError::Pipeline { .. } => "PIPELINE_ERROR",
            PtStemError::Config { .. } => "CONFIG_ERROR",
            PtStemError::Internal(_) => "INTERNAL_ERROR",
            PtStemError::Io(_) => "IO_ERROR",
            PtStemError::Json(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Connection loss ends the current operation; there is no session to retry against.
    pub fn is_connection(&self) -> bool {
        matches!(self, PtStemError::Connection { .. })
    }

    /// Returns a user-friendly recovery suggestion.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            PtStemError::Connection { .. } => {
                Some("Open a session in the DAW and make sure the control bridge is running.")
            }
            PtStemError::OutputDirectory { .. } => {
                Some("Choose an output directory you have write access to.")
            }
            PtStemError::FileMissing { .. } => {
                Some("Check the session's Bounced Files folder and the mix source name.")
            }
            PtStemError::InvalidState { .. } => {
                Some("Check the task status before cancelling or deleting it.")
            }
            PtStemError::Config { .. } => Some("Check the configuration file and PTSTEM_* variables."),
            _ => None,
        }
    }
}
