//! Error types for the mesh engine.

use mesh_state::StorageError;

/// Errors returned to engine callers.
///
/// Upstream and arbitration failures are normally absorbed inside the
/// pipeline; only the variants below ever reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    #[error("memory {memory_id} is not owned by {owner_id}")]
    OwnerMismatch { memory_id: String, owner_id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A collaborator (similarity index, catalog) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations.
pub type MeshResult<T> = std::result::Result<T, MeshError>;
