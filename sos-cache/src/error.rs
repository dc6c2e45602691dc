//! Error types for cache operations
//!
//! Every failure the cache subsystem can report is a variant of [`CacheError`].
//! Variants are grouped by the stage that produces them:
//! - request preconditions, rejected before an update executes
//! - data-source fetches during a full rebuild, aggregated per offering
//! - scheduling (lock and slot waits bounded by the update timeout)
//! - snapshot persistence, which callers log and ignore
//!
//! Each variant has a stable error code and a category so that the
//! operation-handling layer can translate it into a protocol response.
//!
//! # Example
//!
//! ```rust
//! use sos_cache::error::{CacheError, ErrorCategory};
//!
//! fn report(err: &CacheError) {
//!     match err.category() {
//!         ErrorCategory::Precondition => println!("bad request: {}", err),
//!         ErrorCategory::Timeout if err.is_recoverable() => println!("retry later"),
//!         _ => println!("{}: {}", err.error_code(), err),
//!     }
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Triggering request is missing data
    Precondition,
    /// The authoritative data store failed to answer
    DataSource,
    /// A bounded wait expired
    Timeout,
    /// A rebuild this caller waited on failed
    Rebuild,
    /// Snapshot file could not be used
    Snapshot,
    /// I/O or serialization failure
    External,
    /// Bug or shutdown
    Internal,
}

/// A data-source failure recorded for one offering during a full rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferingFailure {
    pub offering: String,
    pub reason: String,
}

impl std::fmt::Display for OfferingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.offering, self.reason)
    }
}

/// Errors that can occur while updating, rebuilding or persisting the cache
#[derive(Error, Debug)]
pub enum CacheError {
    // ═══════════════════════════════════════════════════════════════════════
    // Request preconditions
    // ═══════════════════════════════════════════════════════════════════════

    /// A required request field is absent or empty
    #[error("Missing required field '{field}' in {request}")]
    MissingField {
        request: &'static str,
        field: &'static str,
    },

    /// Request is structurally complete but unusable
    #[error("Invalid {request}: {reason}")]
    InvalidRequest {
        request: &'static str,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Data source errors (full rebuild)
    // ═══════════════════════════════════════════════════════════════════════

    /// A data-source query that is not scoped to an offering failed
    #[error("Data source query '{query}' failed: {reason}")]
    DataSource { query: &'static str, reason: String },

    /// Fetching one offering's data failed
    #[error("Fetching offering '{offering}' failed: {reason}")]
    OfferingFetch { offering: String, reason: String },

    /// One or more offerings failed; nothing was published
    #[error("Full rebuild incomplete, {} offering(s) failed: {}", failures.len(), join_failures(failures))]
    RebuildIncomplete { failures: Vec<OfferingFailure> },

    // ═══════════════════════════════════════════════════════════════════════
    // Scheduling errors
    // ═══════════════════════════════════════════════════════════════════════

    /// A lock or slot wait exceeded the configured update timeout
    #[error("Timed out after {waited_ms}ms waiting for {waiting_for}")]
    LockTimeout {
        waiting_for: &'static str,
        waited_ms: u64,
    },

    /// The rebuild this caller was waiting on failed
    #[error("Full rebuild #{unit} failed: {cause}")]
    RebuildFailed {
        unit: u64,
        #[source]
        cause: Arc<CacheError>,
    },

    /// The controller has been shut down
    #[error("Cache controller is shut down")]
    ShutDown,

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshot errors
    // ═══════════════════════════════════════════════════════════════════════

    /// No snapshot exists at the configured location
    #[error("No snapshot at '{path}'")]
    SnapshotMissing { path: String },

    /// Snapshot was written by an incompatible format version
    #[error("Snapshot format '{format}' version {found} is not supported (expected {expected})")]
    SnapshotVersionMismatch {
        format: String,
        found: u32,
        expected: u32,
    },

    /// Snapshot is truncated, tampered with or otherwise unreadable
    #[error("Corrupt snapshot: {reason}")]
    SnapshotCorrupt { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

fn join_failures(failures: &[OfferingFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CacheError {
    /// Shorthand for [`CacheError::MissingField`]
    pub fn missing(request: &'static str, field: &'static str) -> Self {
        CacheError::MissingField { request, field }
    }

    /// Returns true if resubmitting the same work might succeed
    ///
    /// Timeouts and data-source failures are transient. Precondition errors
    /// need a different request and snapshot errors are resolved by a rebuild.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CacheError::LockTimeout { .. }
            | CacheError::DataSource { .. }
            | CacheError::OfferingFetch { .. }
            | CacheError::RebuildIncomplete { .. } => true,
            CacheError::RebuildFailed { cause, .. } => cause.is_recoverable(),
            _ => false,
        }
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            CacheError::MissingField { .. } | CacheError::InvalidRequest { .. } => {
                ErrorCategory::Precondition
            }

            CacheError::DataSource { .. }
            | CacheError::OfferingFetch { .. }
            | CacheError::RebuildIncomplete { .. } => ErrorCategory::DataSource,

            CacheError::LockTimeout { .. } => ErrorCategory::Timeout,

            CacheError::RebuildFailed { .. } => ErrorCategory::Rebuild,

            CacheError::SnapshotMissing { .. }
            | CacheError::SnapshotVersionMismatch { .. }
            | CacheError::SnapshotCorrupt { .. } => ErrorCategory::Snapshot,

            CacheError::JsonError(_) | CacheError::IoError { .. } => ErrorCategory::External,

            CacheError::ShutDown | CacheError::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::MissingField { .. } => "MISSING_FIELD",
            CacheError::InvalidRequest { .. } => "INVALID_REQUEST",
            CacheError::DataSource { .. } => "DATA_SOURCE_ERROR",
            CacheError::OfferingFetch { .. } => "OFFERING_FETCH_ERROR",
            CacheError::RebuildIncomplete { .. } => "REBUILD_INCOMPLETE",
            CacheError::LockTimeout { .. } => "LOCK_TIMEOUT",
            CacheError::RebuildFailed { .. } => "REBUILD_FAILED",
            CacheError::ShutDown => "SHUT_DOWN",
            CacheError::SnapshotMissing { .. } => "SNAPSHOT_MISSING",
            CacheError::SnapshotVersionMismatch { .. } => "SNAPSHOT_VERSION_MISMATCH",
            CacheError::SnapshotCorrupt { .. } => "SNAPSHOT_CORRUPT",
            CacheError::JsonError(_) => "JSON_ERROR",
            CacheError::IoError { .. } => "IO_ERROR",
            CacheError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError {
            message: err.to_string(),
        }
    }
}
