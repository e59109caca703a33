//! Error types shared across the vmclone workspace.
//!
//! A single error enum keeps the public API uniform: callers match on the
//! kind (or use the predicates below) instead of juggling per-module error
//! types. Recoverable kinds that callers are expected to branch on are
//! `NotFound` and `AlreadyExists`; everything else is fatal to the call.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type VmcloneResult<T> = Result<T, VmcloneError>;

#[derive(Error, Debug)]
pub enum VmcloneError {
    /// A persisted record, namespace, or endpoint is absent.
    /// Recoverable: removal paths treat this as "nothing to do".
    #[error("not found: {0}")]
    NotFound(String),

    /// A create collided with an existing record. Never auto-resolved.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed byte stream or unregistered variant tag. Indicates a
    /// version or registration mismatch between producer and consumer;
    /// always fatal and non-retryable.
    #[error("codec: {0}")]
    Codec(String),

    /// A resource variant failed to re-establish itself on the target
    /// guest. Aborts the remaining clone sequence.
    #[error("resource clone: {0}")]
    ResourceClone(String),

    /// The namespace/endpoint provider rejected or failed a call.
    #[error("provider: {0}")]
    Provider(String),

    /// The guest control channel is absent or failed.
    #[error("connectivity: {0}")]
    Connectivity(String),

    /// An operation was attempted in a lifecycle state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database: {0}")]
    Database(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl VmcloneError {
    /// True for the recoverable "record/object absent" kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when a create collided with an existing record.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
