//! Mesh-State: Persistence for the Memory Mesh
//!
//! This crate provides the persistence layer of the relationship-graph engine.
//! It owns the record types the engine reads and writes and every I/O path to
//! the backing store.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: one row per ordered relation pair, conflict-tolerant writes and
//! single-row conditional operations.
//!
//! ## Key Components
//!
//! - `RelationStore` / `MemoryCatalog`: backend-agnostic storage traits
//! - `InMemoryRelationStore` / `InMemoryCatalog`: fakes for tests and dataset mode
//! - `SurrealHandle`: connection management and row-level operations
//! - `SurrealRelationStore` / `SurrealMemoryCatalog`: SurrealDB trait implementations

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::{InMemoryCatalog, InMemoryRelationStore};
pub use handle::{CloudConfig, SurrealHandle};
pub use schema::{
    clamp_score, MemoryMetadata, MemoryRecord, RelationKey, RelationRecord, RelationType,
};
pub use storage_traits::{MemoryCatalog, RelationFilter, RelationStore, StorageResult};
pub use surreal_store::{SurrealMemoryCatalog, SurrealRelationStore};

/// Result type for mesh-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
