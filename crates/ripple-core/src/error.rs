//! Error types for records and record sets.

use thiserror::Error;

/// A validator rejected a prospective attribute set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    /// Create a validation error with a human-readable message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message the validator produced.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Misuse of a record set. These are programming errors, not data errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    /// A candidate was neither a record nor an attribute object.
    #[error("Can't add an invalid model to a collection: {0}")]
    MalformedCandidate(String),

    /// `sort` was called on a set without a comparator.
    #[error("Cannot sort a set without a comparator")]
    MissingComparator,
}

/// Failures reported by the persistence hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Neither the record type nor the owning set has a persistence hook.
    #[error("No persistence hook configured")]
    NoPersistence,

    /// The hook ran and reported a failure.
    #[error("Sync failed: {0}")]
    Failed(String),
}

/// Errors surfaced by the record persistence helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Validation rejected the attributes.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The persistence hook failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A record set rejected the operation.
    #[error(transparent)]
    Collection(#[from] CollectionError),
}
