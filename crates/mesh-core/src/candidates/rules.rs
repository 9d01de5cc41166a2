//! Pairwise score adjustments for semantic candidates.
//!
//! Rules are data: an ordered list of `(predicate, delta)` pairs evaluated
//! against the source and candidate memories. Domain categories are named
//! sets of host regexes. Operators tune both through `MeshConfig`.

use regex::Regex;
use serde::{Deserialize, Serialize};

use mesh_state::{clamp_score, MemoryRecord};

use crate::error::{MeshError, MeshResult};

/// A named set of host patterns, e.g. `developer` or `entertainment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainCategory {
    pub name: String,
    /// Regexes matched against the lowercased host (without `www.`).
    pub patterns: Vec<String>,
}

impl DomainCategory {
    pub fn new<I, S>(name: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Condition under which a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePredicate {
    /// One memory's host is in category `a` and the other's in `b`, either way round.
    CrossCategory { a: String, b: String },
    /// Both memories carry one of `topics` and their hosts share a category.
    SharedMarkedTopic { topics: Vec<String> },
    /// Both memories come from the same host.
    SameDomain,
}

/// One adjustment: when `predicate` holds, add `delta` and clamp to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjustmentRule {
    pub name: String,
    pub predicate: RulePredicate,
    pub delta: f64,
}

impl AdjustmentRule {
    pub fn new(name: &str, predicate: RulePredicate, delta: f64) -> Self {
        Self {
            name: name.to_string(),
            predicate,
            delta,
        }
    }
}

/// Domain categories plus the ordered adjustment rules that reference them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticRuleSet {
    pub categories: Vec<DomainCategory>,
    pub rules: Vec<AdjustmentRule>,
}

impl Default for SemanticRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl SemanticRuleSet {
    /// No categories, no rules.
    pub fn empty() -> Self {
        Self {
            categories: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// The stock rules: a developer/entertainment penalty and a rare-topic boost.
    pub fn standard() -> Self {
        Self {
            categories: vec![
                DomainCategory::new(
                    "developer",
                    [
                        r"(^|\.)github\.com$",
                        r"(^|\.)gitlab\.com$",
                        r"(^|\.)stackoverflow\.com$",
                        r"(^|\.)docs\.rs$",
                        r"(^|\.)crates\.io$",
                        r"(^|\.)npmjs\.com$",
                        r"(^|\.)developer\.mozilla\.org$",
                    ],
                ),
                DomainCategory::new(
                    "entertainment",
                    [
                        r"(^|\.)youtube\.com$",
                        r"^youtu\.be$",
                        r"(^|\.)netflix\.com$",
                        r"(^|\.)twitch\.tv$",
                        r"(^|\.)spotify\.com$",
                        r"(^|\.)tiktok\.com$",
                    ],
                ),
            ],
            rules: vec![
                AdjustmentRule::new(
                    "developer-vs-entertainment",
                    RulePredicate::CrossCategory {
                        a: "developer".into(),
                        b: "entertainment".into(),
                    },
                    -0.4,
                ),
                AdjustmentRule::new(
                    "shared-rare-topic",
                    RulePredicate::SharedMarkedTopic {
                        topics: vec![
                            "webassembly".into(),
                            "formal verification".into(),
                            "category theory".into(),
                            "zero-knowledge proofs".into(),
                            "compilers".into(),
                        ],
                    },
                    0.2,
                ),
            ],
        }
    }

    pub fn with_category(mut self, category: DomainCategory) -> Self {
        self.categories.push(category);
        self
    }

    pub fn with_rule(mut self, rule: AdjustmentRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Compile the host patterns. Fails on an invalid regex or a rule that
    /// names an unknown category.
    pub fn compile(&self) -> MeshResult<CompiledRuleSet> {
        let mut categories = Vec::with_capacity(self.categories.len());
        for cat in &self.categories {
            let patterns = cat
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        MeshError::Config(format!("category '{}': bad pattern '{p}': {e}", cat.name))
                    })
                })
                .collect::<MeshResult<Vec<_>>>()?;
            categories.push((cat.name.clone(), patterns));
        }

        for rule in &self.rules {
            if !rule.delta.is_finite() {
                return Err(MeshError::Config(format!(
                    "rule '{}': delta must be finite",
                    rule.name
                )));
            }
            if let RulePredicate::CrossCategory { a, b } = &rule.predicate {
                for name in [a, b] {
                    if !categories.iter().any(|(n, _)| n == name) {
                        return Err(MeshError::Config(format!(
                            "rule '{}' references unknown category '{name}'",
                            rule.name
                        )));
                    }
                }
            }
        }

        Ok(CompiledRuleSet {
            categories,
            rules: self.rules.clone(),
        })
    }
}

/// A [`SemanticRuleSet`] with its regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    categories: Vec<(String, Vec<Regex>)>,
    rules: Vec<AdjustmentRule>,
}

impl CompiledRuleSet {
    /// First category whose patterns match `host`.
    pub fn category_of(&self, host: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(host)))
            .map(|(name, _)| name.as_str())
    }

    /// Apply every matching rule in order; the result stays in [0, 1].
    pub fn apply(&self, source: &MemoryRecord, candidate: &MemoryRecord, score: f64) -> f64 {
        let source_host = source.domain();
        let candidate_host = candidate.domain();
        let source_cat = source_host.as_deref().and_then(|h| self.category_of(h));
        let candidate_cat = candidate_host.as_deref().and_then(|h| self.category_of(h));

        let mut adjusted = clamp_score(score);
        for rule in &self.rules {
            let fires = match &rule.predicate {
                RulePredicate::CrossCategory { a, b } => match (source_cat, candidate_cat) {
                    (Some(s), Some(c)) => (s == a && c == b) || (s == b && c == a),
                    _ => false,
                },
                RulePredicate::SharedMarkedTopic { topics } => {
                    source_cat.is_some()
                        && source_cat == candidate_cat
                        && topics.iter().any(|t| {
                            let t = t.to_lowercase();
                            has_topic(source, &t) && has_topic(candidate, &t)
                        })
                }
                RulePredicate::SameDomain => {
                    source_host.is_some() && source_host == candidate_host
                }
            };
            if fires {
                adjusted = clamp_score(adjusted + rule.delta);
            }
        }
        adjusted
    }
}

fn has_topic(memory: &MemoryRecord, lowered: &str) -> bool {
    memory
        .metadata
        .topics
        .iter()
        .any(|t| t.to_lowercase() == lowered)
}
