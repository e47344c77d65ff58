//! Three-tier JSON extraction shared by `QueryPlanner` and `ResultProcessor`.
//!
//! LLM output is never trusted to be pure JSON. We try, in order:
//! 1. the first fenced ```json ... ``` block,
//! 2. the first balanced `{...}` span that contains a given required key,
//! 3. the entire text.
//!
//! The first tier that parses into valid JSON wins. If none parse, callers
//! fall back to their own default (spec §4.4/§4.5).

/// Attempt to locate and parse a JSON object out of free-form LLM text.
///
/// `required_key` is used only to disambiguate tier 2 (the balanced-brace
/// scan) when more than one `{...}` span is present; tiers 1 and 3 are tried
/// regardless of whether the key turns out to be present.
pub fn extract_json_object(text: &str, required_key: &str) -> Option<serde_json::Value> {
    if let Some(fenced) = extract_fenced_json(text) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&fenced) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let Some(braced) = extract_balanced_braces_with_key(text, required_key) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&braced) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        if v.is_object() {
            return Some(v);
        }
    }

    None
}

/// Tier 1: pull the contents of the first ```json ... ``` (or bare ``` ```)
/// fenced code block.
fn extract_fenced_json(text: &str) -> Option<String> {
    let fence_start = text.find("```")?;
    let after_fence = &text[fence_start + 3..];
    // Skip an optional language tag (e.g. "json") up to the first newline.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let fence_end = body.find("```")?;
    let candidate = body[..fence_end].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Tier 2: scan for the first balanced `{...}` span. When multiple top-level
/// braces exist, prefer the first one whose raw text contains `required_key`
/// so we don't accidentally pick up an unrelated JSON blob the model emitted
/// earlier in its reasoning.
fn extract_balanced_braces_with_key(text: &str, required_key: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = find_matching_brace(bytes, i) {
                candidates.push(&text[i..=end]);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }

    candidates
        .iter()
        .find(|c| c.contains(required_key))
        .or_else(|| candidates.first())
        .map(|c| c.to_string())
}

/// Find the index of the `}` that matches the `{` at `open`, respecting
/// string literals (so braces inside quoted strings don't confuse the scan).
fn find_matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Sure, here you go:\n```json\n{\"queries\": [{\"query\": \"a\", \"researchGoal\": \"b\"}]}\n```\nDone.";
        let v = extract_json_object(text, "queries").unwrap();
        assert!(v["queries"].is_array());
    }

    #[test]
    fn extracts_balanced_braces_without_fence() {
        let text = "Some preamble { \"noise\": true } and then {\"learnings\": [\"x\"], \"followUpQuestions\": []} trailing";
        let v = extract_json_object(text, "learnings").unwrap();
        assert_eq!(v["learnings"][0], "x");
    }

    #[test]
    fn falls_back_to_whole_text() {
        let text = r#"{"learnings": ["only thing here"], "followUpQuestions": []}"#;
        let v = extract_json_object(text, "learnings").unwrap();
        assert_eq!(v["learnings"][0], "only thing here");
    }

    #[test]
    fn returns_none_on_garbage() {
        assert!(extract_json_object("not json at all, sorry", "queries").is_none());
    }

    #[test]
    fn braces_inside_string_values_do_not_break_scan() {
        let text = r#"{"learnings": ["a sentence with a brace: { not json }"], "followUpQuestions": []}"#;
        let v = extract_json_object(text, "learnings").unwrap();
        assert_eq!(v["learnings"][0], "a sentence with a brace: { not json }");
    }

    #[test]
    fn idempotent_on_valid_plain_json() {
        let original = serde_json::json!({"queries": [{"query": "q", "researchGoal": "g"}]});
        let s = serde_json::to_string(&original).unwrap();
        let roundtripped = extract_json_object(&s, "queries").unwrap();
        assert_eq!(roundtripped, original);
    }
}
