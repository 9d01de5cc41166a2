//! Error types for mesh-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A row for this ordered pair already exists (unique index violation).
    #[error("relation {source_id} -> {target_id} already exists")]
    Conflict {
        source_id: String,
        target_id: String,
    },

    /// A relation that was expected to exist is gone.
    #[error("relation {source_id} -> {target_id} not found")]
    RelationNotFound {
        source_id: String,
        target_id: String,
    },

    /// A memory that was expected to exist is gone.
    #[error("memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    /// A stored score fell outside [0, 1].
    #[error("score {score} out of range for {source_id} -> {target_id}")]
    InvalidScore {
        source_id: String,
        target_id: String,
        score: f64,
    },

    /// Anything the backend reports that is not one of the above.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error is the duplicate-insert race every writer must tolerate.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_detected() {
        let err = StorageError::Conflict {
            source_id: "a".into(),
            target_id: "b".into(),
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("a -> b"));
        assert!(!StorageError::Backend("boom".into()).is_conflict());
    }
}
