//! Error types for the preview-props engine and its backing document.

use thiserror::Error;

use crate::preview::keys::StableKey;

/// Result type alias for collab operations.
pub type CollabResult<T> = Result<T, CollabError>;

/// Errors that can occur while deriving preview props or writing back through them.
#[derive(Error, Debug)]
pub enum CollabError {
    /// Automerge error during document operations.
    #[error("Automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    /// Autosurgeon hydration error.
    #[error("Hydration error: {0}")]
    Hydrate(#[from] autosurgeon::HydrateError),

    /// Autosurgeon reconcile error.
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] autosurgeon::ReconcileError),

    /// Field not declared by an object schema, or missing from an object value.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// No object or value exists at a document path.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Schema violation - a value does not have the shape its schema describes.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Index out of bounds for list operations.
    #[error("Index {index} out of bounds for list of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    /// An element write named a stable key that is not in the current array.
    #[error("No element with key {0} in the current array value")]
    UnknownElementKey(StableKey),

    /// A write path that is not supported through preview props.
    #[error("Unimplemented operation: {0}")]
    Unimplemented(String),

    /// The shared document behind a write channel has been dropped.
    #[error("Document has been closed")]
    DocumentClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CollabError {
    /// Creates a FieldNotFound error.
    pub fn field_not_found(field: impl Into<String>) -> Self {
        Self::FieldNotFound(field.into())
    }

    /// Creates a PathNotFound error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a SchemaViolation error.
    pub fn schema_violation(msg: impl Into<String>) -> Self {
        Self::SchemaViolation(msg.into())
    }

    /// Creates an IndexOutOfBounds error.
    pub fn index_out_of_bounds(index: usize, length: usize) -> Self {
        Self::IndexOutOfBounds { index, length }
    }

    /// Creates an Unimplemented error.
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented(operation.into())
    }

    /// Creates a Serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
