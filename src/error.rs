//! Error types for rollup_tables.
//!
//! All errors that can occur within the crate are represented by [`RollupError`].
//! Errors are propagated via `Result<T, RollupError>` throughout the codebase;
//! failures reported by external collaborators (metadata store, lock provider,
//! load engine) are mapped into the matching variant at the trait boundary.
//!
//! # Error Classification
//!
//! Errors are classified into three categories that tell the caller whether a
//! retry can help:
//! - **User**: malformed rollup definitions, duplicate names, unknown
//!   children. Never retried.
//! - **System**: lock contention, metadata persistence, load failures. The
//!   caller may retry; nothing in this crate retries on its own.
//! - **Internal**: bugs. Not retried.

use std::fmt;

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    // ── User errors: fail, don't retry ──────────────────────────────────
    /// The rollup definition is not supported: plan shape, aggregate
    /// function, DISTINCT, missing source column, or a child base table.
    #[error("malformed rollup specification: {0}")]
    MalformedSpecification(String),

    /// A child with the same (case-insensitive) name is already registered.
    #[error("rollup already exists: {0}")]
    DuplicateDescriptor(String),

    /// The requested child is not registered on the base table.
    #[error("rollup {name} not found; known rollups: [{}]", .known.join(", "))]
    ChildNotFound { name: String, known: Vec<String> },

    /// The base table could not be resolved.
    #[error("table not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided to an API function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── System errors: caller may retry ─────────────────────────────────
    /// A named lock on the base table could not be acquired.
    #[error("lock acquisition failed: {0}")]
    LockAcquisition(String),

    /// Reading or writing the base table's metadata document failed.
    #[error("metadata write failed: {0}")]
    MetadataWrite(String),

    /// The external load engine rejected or failed the load job.
    #[error("load failed: {0}")]
    Load(String),

    // ── Internal errors: should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl RollupError {
    /// Whether the caller may reasonably retry the failed operation.
    ///
    /// Lock contention and persistence failures are transient; everything
    /// the user got wrong will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RollupError::LockAcquisition(_) | RollupError::MetadataWrite(_) | RollupError::Load(_)
        )
    }

    /// Whether the failure happened before any metadata was touched.
    ///
    /// User errors are always raised during validation or the duplicate
    /// check, so they never leave partial state behind.
    pub fn is_pre_mutation(&self) -> bool {
        self.kind() == RollupErrorKind::User
    }
}

/// Classification of error severity/kind for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupErrorKind {
    User,
    System,
    Internal,
}

impl fmt::Display for RollupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollupErrorKind::User => write!(f, "USER"),
            RollupErrorKind::System => write!(f, "SYSTEM"),
            RollupErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl RollupError {
    /// Classify the error for monitoring and alerting.
    pub fn kind(&self) -> RollupErrorKind {
        match self {
            RollupError::MalformedSpecification(_)
            | RollupError::DuplicateDescriptor(_)
            | RollupError::ChildNotFound { .. }
            | RollupError::NotFound(_)
            | RollupError::InvalidArgument(_)
            | RollupError::Config(_) => RollupErrorKind::User,

            RollupError::LockAcquisition(_)
            | RollupError::MetadataWrite(_)
            | RollupError::Load(_) => RollupErrorKind::System,

            RollupError::InternalError(_) => RollupErrorKind::Internal,
        }
    }
}

/// Shorthand for building a [`RollupError::MalformedSpecification`].
pub(crate) fn malformed(msg: impl Into<String>) -> RollupError {
    RollupError::MalformedSpecification(msg.into())
}
