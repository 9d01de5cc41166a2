//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. after a batch or a daemon tick).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

macro_rules! counters {
    ($( $field:ident => $inc:ident ),+ $(,)?) => {
        /// Lightweight atomic counters, no allocations and no locking.
        pub struct Metrics {
            $( $field: AtomicU64, )+
        }

        impl Metrics {
            pub const fn new() -> Self {
                Self {
                    $( $field: AtomicU64::new(0), )+
                }
            }

            $(
                pub fn $inc(&self, n: u64) {
                    if n > 0 {
                        self.$field.fetch_add(n, Ordering::Relaxed);
                        tracing::trace!(metric = stringify!($field), n, "counter incremented");
                    }
                }

                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )+

            /// Emit all current counter values as a single `info!` event.
            pub fn flush(&self) {
                tracing::info!(
                    metric = "flush",
                    $( $field = self.$field(), )+
                );
            }

            /// Reset all counters to zero (useful in tests).
            pub fn reset(&self) {
                $( self.$field.store(0, Ordering::Relaxed); )+
            }
        }
    };
}

counters! {
    memories_processed => add_memories_processed,
    relations_inserted => add_relations_inserted,
    relations_updated => add_relations_updated,
    upsert_conflicts => add_upsert_conflicts,
    relation_write_failures => add_relation_write_failures,
    arbitration_calls => add_arbitration_calls,
    arbitration_cache_hits => add_arbitration_cache_hits,
    arbitration_failures => add_arbitration_failures,
    relations_pruned => add_relations_pruned,
    meshes_assembled => add_meshes_assembled,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
