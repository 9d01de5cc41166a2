//! Mesh-Arbiter: Relevance Arbitration for the Memory Mesh
//!
//! This crate asks an external language-model service whether candidate
//! memory pairs are really related, and caches the answers.
//!
//! ## Layer 1 - Arbitration
//!
//! Focus: a narrow batch interface that never makes the caller fail. Every
//! error is typed so the tiered filter can fall back to its heuristic.
//!
//! ## Key Components
//!
//! - `RelevanceArbiter`: batch evaluation trait
//! - `HttpArbiter`: chat-completions backend over reqwest
//! - `UnavailableArbiter`: always-unavailable backend for offline runs
//! - `InMemoryArbitrationCache`: TTL cache keyed by pair and topic sets

pub mod cache;
mod error;
pub mod http;
pub mod prompt;
mod verdict;

use async_trait::async_trait;

pub use cache::{
    cache_key, spawn_cache_sweeper, ArbitrationCache, InMemoryArbitrationCache,
    DEFAULT_CACHE_TTL_HOURS,
};
pub use error::ArbiterError;
pub use http::{HttpArbiter, HttpArbiterConfig};
pub use verdict::{ArbitrationVerdict, MemorySummary};

/// Result type for arbitration calls
pub type ArbiterResult<T> = std::result::Result<T, ArbiterError>;

/// Judges the relevance of candidate memories to a source memory.
///
/// Implementations return one slot per candidate, in candidate order. A
/// slot is `None` when the backend gave no verdict for that candidate; such
/// candidates count as non-relevant for the current run only.
#[async_trait]
pub trait RelevanceArbiter: Send + Sync {
    async fn evaluate_batch(
        &self,
        source: &MemorySummary,
        candidates: &[MemorySummary],
    ) -> ArbiterResult<Vec<Option<ArbitrationVerdict>>>;

    /// Short backend name for logs.
    fn name(&self) -> &str {
        "arbiter"
    }
}

/// Backend used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableArbiter;

#[async_trait]
impl RelevanceArbiter for UnavailableArbiter {
    async fn evaluate_batch(
        &self,
        _source: &MemorySummary,
        _candidates: &[MemorySummary],
    ) -> ArbiterResult<Vec<Option<ArbitrationVerdict>>> {
        Err(ArbiterError::Unavailable(
            "no arbitration endpoint configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
