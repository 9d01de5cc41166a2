//! Record definitions shared by every backend
//!
//! - `MemoryRecord`: a captured content record owned by one user (read-only here)
//! - `RelationRecord`: a scored, typed, directed edge between two memories
//! - `RelationKey`: the ordered `(source, target)` pair a relation row is unique on

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facet metadata extracted by the ingestion pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMetadata {
    pub topics: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub key_points: BTreeSet<String>,
    pub searchable_terms: BTreeSet<String>,
}

impl MemoryMetadata {
    /// Build metadata with only topics set.
    pub fn with_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// True when every facet is empty.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.categories.is_empty()
            && self.key_points.is_empty()
            && self.searchable_terms.is_empty()
    }
}

/// A captured memory, as served by the memory catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Where the capture came from (e.g. "extension", "web", "import").
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

fn default_source_type() -> String {
    "extension".to_string()
}

impl MemoryRecord {
    /// Create a memory with empty metadata, created now.
    pub fn new(id: &str, owner_id: &str, title: &str) -> Self {
        MemoryRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            content: String::new(),
            url: None,
            source_type: default_source_type(),
            created_at: Utc::now(),
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    pub fn with_source_type(mut self, source_type: &str) -> Self {
        self.source_type = source_type.to_string();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Host of the source URL, lowercased and without a leading `www.`.
    pub fn domain(&self) -> Option<String> {
        let raw = self.url.as_deref()?;
        let parsed = url::Url::parse(raw).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
    }

    /// Label used when rendering the memory as a graph node.
    pub fn label(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

/// Relation type, ordered by specificity: semantic > topical > temporal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Semantic,
    Topical,
    Temporal,
}

impl RelationType {
    /// Rank in the specificity hierarchy (higher is more specific).
    pub fn specificity(self) -> u8 {
        match self {
            RelationType::Semantic => 3,
            RelationType::Topical => 2,
            RelationType::Temporal => 1,
        }
    }

    pub fn is_more_specific_than(self, other: RelationType) -> bool {
        self.specificity() > other.specificity()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Semantic => "semantic",
            RelationType::Topical => "topical",
            RelationType::Temporal => "temporal",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(RelationType::Semantic),
            "topical" => Ok(RelationType::Topical),
            "temporal" => Ok(RelationType::Temporal),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

/// The ordered pair a relation row is unique on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub source_id: String,
    pub target_id: String,
}

impl RelationKey {
    pub fn new(source_id: &str, target_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        }
    }

    /// The same pair viewed from the other endpoint.
    pub fn reversed(&self) -> Self {
        Self {
            source_id: self.target_id.clone(),
            target_id: self.source_id.clone(),
        }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_id, self.target_id)
    }
}

/// A stored relation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub source_id: String,
    pub target_id: String,
    pub owner_id: String,
    pub relation_type: RelationType,
    /// Always within [0, 1].
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RelationRecord {
    /// Create a relation stamped now. The score is clamped into [0, 1].
    pub fn new(
        owner_id: &str,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
        score: f64,
    ) -> Self {
        let now = Utc::now();
        RelationRecord {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            owner_id: owner_id.to_string(),
            relation_type,
            score: clamp_score(score),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(&self.source_id, &self.target_id)
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specificity_hierarchy() {
        assert!(RelationType::Semantic.is_more_specific_than(RelationType::Topical));
        assert!(RelationType::Topical.is_more_specific_than(RelationType::Temporal));
        assert!(!RelationType::Temporal.is_more_specific_than(RelationType::Semantic));
        assert!(!RelationType::Topical.is_more_specific_than(RelationType::Topical));
    }

    #[test]
    fn relation_type_parses_case_insensitively() {
        assert_eq!("Semantic".parse::<RelationType>(), Ok(RelationType::Semantic));
        assert_eq!(" temporal ".parse::<RelationType>(), Ok(RelationType::Temporal));
        assert!("none".parse::<RelationType>().is_err());
    }

    #[test]
    fn domain_strips_www_and_lowercases() {
        let m = MemoryRecord::new("m1", "u1", "t").with_url("https://WWW.GitHub.com/rust-lang");
        assert_eq!(m.domain().as_deref(), Some("github.com"));

        let no_url = MemoryRecord::new("m2", "u1", "t");
        assert_eq!(no_url.domain(), None);

        let garbage = MemoryRecord::new("m3", "u1", "t").with_url("not a url");
        assert_eq!(garbage.domain(), None);
    }

    #[test]
    fn relation_score_is_clamped() {
        let r = RelationRecord::new("u", "a", "b", RelationType::Topical, 1.7);
        assert_eq!(r.score, 1.0);
        let r = RelationRecord::new("u", "a", "b", RelationType::Topical, f64::NAN);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn label_falls_back_to_id() {
        let m = MemoryRecord::new("m1", "u1", "  ");
        assert_eq!(m.label(), "m1");
    }

    #[test]
    fn memory_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "m1",
            "owner_id": "u1",
            "title": "Rust ownership",
            "created_at": "2024-05-01T10:00:00Z",
            "metadata": { "topics": ["rust", "memory"] }
        });
        let m: MemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(m.source_type, "extension");
        assert_eq!(m.metadata.topics.len(), 2);
        assert!(m.metadata.categories.is_empty());
    }
}
