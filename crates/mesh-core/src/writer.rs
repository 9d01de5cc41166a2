//! Idempotent relation upserts.
//!
//! Writes are optimistic: look up the pair, insert if absent, and treat a
//! unique-index conflict on insert as another writer having won the race.
//! Existing rows are only replaced by a clearly better score, or by a
//! slightly better score with a more specific type.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use mesh_state::{RelationKey, RelationRecord, RelationStore, RelationType, StorageError};

use crate::candidates::Candidate;
use crate::config::WriterConfig;
use crate::error::MeshResult;
use crate::metrics::METRICS;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// A concurrent writer created or removed the row first; nothing written.
    Conflicted,
}

/// Whether `(new_type, new_score)` should overwrite `(old_type, old_score)`.
pub fn should_update(
    old_type: RelationType,
    old_score: f64,
    new_type: RelationType,
    new_score: f64,
    margin: f64,
) -> bool {
    new_score > old_score + margin
        || (new_score > old_score && new_type.is_more_specific_than(old_type))
}

pub struct RelationWriter {
    store: Arc<dyn RelationStore>,
    config: WriterConfig,
}

impl RelationWriter {
    pub fn new(store: Arc<dyn RelationStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    /// Upsert one accepted candidate from `source_id`.
    ///
    /// Only non-conflict storage failures are returned as errors.
    #[instrument(skip(self, candidate), fields(target_id = %candidate.target_id))]
    pub async fn upsert(
        &self,
        owner_id: &str,
        source_id: &str,
        candidate: &Candidate,
    ) -> MeshResult<UpsertOutcome> {
        let key = RelationKey::new(source_id, &candidate.target_id);
        let outcome = match self.store.find_by_key(&key).await? {
            None => {
                let record = RelationRecord::new(
                    owner_id,
                    source_id,
                    &candidate.target_id,
                    candidate.relation_type,
                    candidate.score,
                );
                match self.store.insert(record).await {
                    Ok(()) => UpsertOutcome::Inserted,
                    Err(e) if e.is_conflict() => {
                        debug!(%key, "Insert lost the race; keeping the existing row");
                        UpsertOutcome::Conflicted
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(existing) => {
                if should_update(
                    existing.relation_type,
                    existing.score,
                    candidate.relation_type,
                    candidate.score,
                    self.config.update_margin,
                ) {
                    match self
                        .store
                        .update(&key, candidate.relation_type, candidate.score)
                        .await
                    {
                        Ok(()) => UpsertOutcome::Updated,
                        Err(StorageError::RelationNotFound { .. }) => {
                            debug!(%key, "Row vanished before update");
                            UpsertOutcome::Conflicted
                        }
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };

        match outcome {
            UpsertOutcome::Inserted => METRICS.add_relations_inserted(1),
            UpsertOutcome::Updated => METRICS.add_relations_updated(1),
            UpsertOutcome::Conflicted => METRICS.add_upsert_conflicts(1),
            UpsertOutcome::Unchanged => {}
        }
        Ok(outcome)
    }
}
