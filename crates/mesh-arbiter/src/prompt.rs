//! Prompt construction and tolerant parsing of arbiter output.
//!
//! Model output is untrusted text. Parsing accepts a bare JSON array, an
//! object wrapping the array, or either inside a markdown code fence. Entries
//! are matched to candidates by `memoryId` when present, by position otherwise.
//! Candidates left without a usable entry get an empty slot.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::error::ArbiterError;
use crate::verdict::{ArbitrationVerdict, MemorySummary};
use crate::ArbiterResult;

/// System instruction sent with every batch.
pub const SYSTEM_PROMPT: &str = "You judge whether saved web memories are meaningfully related. \
Answer only with JSON.";

const WRAPPER_KEYS: [&str; 3] = ["evaluations", "results", "verdicts"];
const ID_KEYS: [&str; 3] = ["memoryId", "memory_id", "candidateId"];

fn describe(m: &MemorySummary) -> String {
    let topics = if m.topics.is_empty() {
        "none".to_string()
    } else {
        m.topics.join(", ")
    };
    format!(
        "id: {}\ntitle: {}\nsummary: {}\ntopics: {}\nurl: {}",
        m.memory_id,
        m.title,
        m.summary,
        topics,
        m.url.as_deref().unwrap_or("-"),
    )
}

/// Build the user prompt for one source memory and its candidates.
pub fn build_prompt(source: &MemorySummary, candidates: &[MemorySummary]) -> String {
    let mut prompt = String::new();
    prompt.push_str("SOURCE MEMORY\n");
    prompt.push_str(&describe(source));
    prompt.push_str("\n\nCANDIDATES\n");
    for (i, c) in candidates.iter().enumerate() {
        prompt.push_str(&format!("[{}]\n{}\n\n", i, describe(c)));
    }
    prompt.push_str(
        "For each candidate, in order, return an object with: \
         memoryId (string), isRelevant (bool), relevanceScore (0..1), \
         relationshipType (\"semantic\", \"topical\", \"temporal\" or \"none\"), \
         reasoning (one sentence). Respond with {\"evaluations\": [...]}.",
    );
    prompt
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
        return body.trim_end().trim_end_matches("```").trim();
    }
    trimmed
}

fn parse_json_loosely(text: &str) -> Option<Value> {
    let body = strip_code_fence(text);
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        return Some(v);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&body[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn entries(value: Value, expected: usize) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = obj.remove(key) {
                    return Some(items);
                }
            }
            if expected == 1 && obj.contains_key("isRelevant") {
                return Some(vec![Value::Object(obj)]);
            }
            None
        }
        _ => None,
    }
}

fn entry_id(entry: &Value) -> Option<String> {
    ID_KEYS
        .iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Parse raw model output into one slot per candidate, in candidate order.
///
/// A slot is `None` when the response carried no verdict for that candidate.
/// Returns `Malformed` only when nothing usable could be extracted.
pub fn parse_verdicts(
    text: &str,
    candidates: &[MemorySummary],
) -> ArbiterResult<Vec<Option<ArbitrationVerdict>>> {
    let value = parse_json_loosely(text)
        .ok_or_else(|| ArbiterError::Malformed("response is not JSON".to_string()))?;
    let items = entries(value, candidates.len())
        .ok_or_else(|| ArbiterError::Malformed("no verdict array in response".to_string()))?;

    let mut parsed: Vec<(Option<String>, ArbitrationVerdict)> = Vec::new();
    for item in items {
        let id = entry_id(&item);
        match serde_json::from_value::<ArbitrationVerdict>(item) {
            Ok(v) => parsed.push((id, v.clamped())),
            Err(e) => warn!(error = %e, "Skipping unparseable verdict entry"),
        }
    }
    if parsed.is_empty() && !candidates.is_empty() {
        return Err(ArbiterError::Malformed(
            "no parseable verdict entries".to_string(),
        ));
    }

    let known: HashMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.memory_id.as_str(), i))
        .collect();
    let by_id = parsed
        .iter()
        .any(|(id, _)| id.as_deref().is_some_and(|id| known.contains_key(id)));

    let mut out: Vec<Option<ArbitrationVerdict>> = vec![None; candidates.len()];
    if by_id {
        for (id, v) in parsed {
            if let Some(&i) = id.as_deref().and_then(|id| known.get(id)) {
                out[i].get_or_insert(v);
            }
        }
    } else {
        for (slot, (_, v)) in out.iter_mut().zip(parsed) {
            *slot = Some(v);
        }
    }

    Ok(out)
}
