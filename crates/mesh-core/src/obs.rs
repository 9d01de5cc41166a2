//! Structured observability hooks for engine lifecycle events.
//!
//! This module provides:
//! - Memory-scoped tracing spans via [`memory_span`]
//! - Emission functions for processing, arbitration, maintenance and mesh assembly
//!
//! Events are emitted at `info!` level with an `event = "..."` field so log
//! pipelines can filter on it. Use `RUST_LOG` to adjust verbosity.

use tracing::info;

/// Span tagged with the memory being processed.
///
/// Attach it to the processing future rather than entering it, so it
/// follows the task across await points.
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
/// engine.process_memory("mem-123", "owner-1")
///     .instrument(memory_span("mem-123", "owner-1"))
///     .await?;
/// ```
pub fn memory_span(memory_id: &str, owner_id: &str) -> tracing::Span {
    tracing::info_span!("mesh.memory", memory_id = %memory_id, owner_id = %owner_id)
}

/// Emit event: relation computation finished for one memory.
pub fn emit_memory_processed(memory_id: &str, candidates: usize, accepted: usize, inserted: usize) {
    info!(
        event = "memory.processed",
        memory_id = %memory_id,
        candidates = candidates,
        accepted = accepted,
        inserted = inserted,
    );
}

/// Emit event: a memory failed to process (warning level).
pub fn emit_memory_failed(memory_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "memory.failed", memory_id = %memory_id, error = %error);
}

/// Emit event: one accepted relation could not be written (warning level).
pub fn emit_relation_write_failed(source_id: &str, target_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "relation.write_failed",
        source_id = %source_id,
        target_id = %target_id,
        error = %error,
    );
}

/// Emit event: tier-3 arbitration finished.
pub fn emit_arbitration(memory_id: &str, cache_hits: usize, called: usize, accepted: usize) {
    info!(
        event = "arbitration.completed",
        memory_id = %memory_id,
        cache_hits = cache_hits,
        called = called,
        accepted = accepted,
    );
}

/// Emit event: arbitration failed and tier-3 fell back to the heuristic.
pub fn emit_arbitration_degraded(memory_id: &str, reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "arbitration.degraded", memory_id = %memory_id, reason = %reason);
}

/// Emit event: a maintenance pass finished.
pub fn emit_maintenance_finished(removed: usize, failed_steps: usize, duration_ms: u64) {
    info!(
        event = "maintenance.finished",
        removed = removed,
        failed_steps = failed_steps,
        duration_ms = duration_ms,
    );
}

/// Emit event: a maintenance step failed (warning level).
pub fn emit_maintenance_step_failed(step: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "maintenance.step_failed", step = %step, error = %error);
}

/// Emit event: a mesh was assembled for an owner.
pub fn emit_mesh_assembled(owner_id: &str, nodes: usize, edges: usize, layout: &str, edge_source: &str) {
    info!(
        event = "mesh.assembled",
        owner_id = %owner_id,
        nodes = nodes,
        edges = edges,
        layout = %layout,
        edge_source = %edge_source,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_span_create() {
        let span = memory_span("m1", "u1");
        let _entered = span.enter();
        emit_memory_processed("m1", 3, 1, 1);
        emit_relation_write_failed("m1", "m2", &"backend down");
    }
}
