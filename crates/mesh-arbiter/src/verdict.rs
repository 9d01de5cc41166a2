//! Request and verdict types exchanged with the arbiter.

use mesh_state::{MemoryRecord, RelationType};
use serde::{Deserialize, Serialize};

/// What the arbiter sees of one memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub memory_id: String,
    pub title: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub url: Option<String>,
}

impl From<&MemoryRecord> for MemorySummary {
    fn from(m: &MemoryRecord) -> Self {
        MemorySummary {
            memory_id: m.id.clone(),
            title: m.title.clone(),
            summary: m.summary.clone(),
            topics: m.metadata.topics.iter().cloned().collect(),
            url: m.url.clone(),
        }
    }
}

/// The arbiter's judgement on one candidate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationVerdict {
    #[serde(alias = "is_relevant")]
    pub is_relevant: bool,
    /// In [0, 1]; out-of-range values are clamped on parse.
    #[serde(alias = "relevance_score")]
    pub relevance_score: f64,
    /// "semantic", "topical", "temporal" or "none".
    #[serde(alias = "relationship_type", default = "none_type")]
    pub relationship_type: String,
    #[serde(default)]
    pub reasoning: String,
}

fn none_type() -> String {
    "none".to_string()
}

impl ArbitrationVerdict {
    /// Verdict used when no usable judgement exists for a candidate.
    pub fn non_relevant(reasoning: impl Into<String>) -> Self {
        Self {
            is_relevant: false,
            relevance_score: 0.0,
            relationship_type: none_type(),
            reasoning: reasoning.into(),
        }
    }

    /// The arbitrated relation type, if it names one we store.
    pub fn relation_type(&self) -> Option<RelationType> {
        self.relationship_type.parse().ok()
    }

    pub(crate) fn clamped(mut self) -> Self {
        self.relevance_score = if self.relevance_score.is_nan() {
            0.0
        } else {
            self.relevance_score.clamp(0.0, 1.0)
        };
        self
    }
}
