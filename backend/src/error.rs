//! Error types for the Rosterload import pipeline.
//!
//! This module defines one error type per concern:
//!
//! - [`CsvError`] - structural problems reading the uploaded file
//! - [`SchemaError`] - invalid entity schema configuration
//! - [`StoreError`] - failures reported by the record store
//! - [`CommitError`] - infrastructure failures that abort a commit
//! - [`PipelineError`] - top-level preview/confirm errors
//! - [`SessionError`] - illegal orchestrator transitions
//! - [`ConfigError`] - invalid environment configuration
//! - [`ServerError`] - HTTP layer errors
//!
//! Row-level problems (validation errors, warnings, duplicates, per-row commit
//! failures) are *data*, not errors: they travel inside
//! [`ImportPreview`](crate::models::ImportPreview) and
//! [`ImportResult`](crate::models::ImportResult).

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Structural CSV error with location context.
///
/// Fatal to the whole preview: no row is processed when one is raised.
#[derive(Debug, Clone)]
pub struct CsvError {
    pub line: usize,
    pub column: Option<String>,
    pub value: Option<String>,
    pub message: String,
}

impl CsvError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            value: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.column, &self.value) {
            (Some(col), Some(val)) => {
                write!(f, "Line {}, column '{}' (value '{}'): {}", self.line, col, val, self.message)
            }
            (Some(col), None) => {
                write!(f, "Line {}, column '{}': {}", self.line, col, self.message)
            }
            _ => {
                write!(f, "Line {}: {}", self.line, self.message)
            }
        }
    }
}

impl std::error::Error for CsvError {}

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors loading an entity schema definition.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Definition is not valid JSON or does not deserialize.
    #[error("Schema JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Definition violates the schema-definition JSON Schema.
    #[error("Schema definition invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// Unknown entity type name.
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    /// IO error reading a definition file.
    #[error("Schema IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors reported by a [`RecordStore`](crate::store::RecordStore).
///
/// `Conflict` and `Rejected` concern a single record and are reported per row.
/// Every other variant is an infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store refused the record (e.g. a constraint on a field value).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Target record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The store is unreachable or failed mid-operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Transaction misuse (nested begin, commit without begin).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// IO error in a file-backed store.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error in a file-backed store.
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this failure is attributable to one record rather than the store.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Rejected(_) | Self::NotFound(_))
    }
}

// =============================================================================
// Commit Errors
// =============================================================================

/// Infrastructure failure during commit. The batch was rolled back.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The store failed in a way unrelated to any particular row.
    #[error("Commit aborted{}: {source}", at_row(.row_number))]
    Infrastructure {
        row_number: Option<usize>,
        #[source]
        source: StoreError,
    },

    /// Rolling back after an infrastructure failure failed too.
    #[error("Commit aborted ({cause}) and rollback failed: {rollback}")]
    RollbackFailed { cause: String, rollback: StoreError },
}

fn at_row(row_number: &Option<usize>) -> String {
    row_number.map(|n| format!(" at row {}", n)).unwrap_or_default()
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors returned by [`crate::pipeline::preview`] and
/// [`crate::pipeline::confirm`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Schema definition error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Store error outside of commit (e.g. loading the duplicate index).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Commit aborted.
    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    /// No scoping context (e.g. vendor) supplied.
    #[error("A target scope is required")]
    MissingScope,

    /// Required canonical columns are absent from the header row.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),
}

// =============================================================================
// Session Errors
// =============================================================================

/// Orchestrator state machine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Event not accepted in the current state.
    #[error("Cannot apply '{event}' while in '{state}' state")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

// =============================================================================
// Config Errors
// =============================================================================

/// Invalid environment configuration.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid value '{value}' for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown session or resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
