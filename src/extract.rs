use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("no parsable JSON object found in response text")]
pub struct ExtractionError;

type Extracted = Map<String, Value>;

/// Recovers a JSON object from model output that does not reliably honor its
/// format instructions. Strategies run strictest-first and the first one that
/// parses wins; `max_attempts` bounds how far down the list we go.
pub fn extract(text: &str, max_attempts: usize) -> Result<Extracted, ExtractionError> {
    const STRATEGIES: [fn(&str) -> Option<Extracted>; 3] =
        [direct_parse, fenced_block_parse, brace_scan_parse];

    STRATEGIES
        .iter()
        .take(max_attempts.max(1))
        .find_map(|strategy| strategy(text))
        .ok_or(ExtractionError)
}

/// Copies each requested field from `data`, substituting `default` for the
/// missing ones. Callers tolerate partially populated listings.
#[allow(dead_code)]
pub fn extract_fields(data: &Extracted, fields: &[&str], default: &Value) -> Extracted {
    fields
        .iter()
        .map(|&field| {
            (
                field.to_string(),
                data.get(field).cloned().unwrap_or_else(|| default.clone()),
            )
        })
        .collect()
}

// Strategy 1: the entire text is one JSON document, modulo surrounding
// whitespace. serde rejects trailing noise, which is exactly the strictness
// wanted here.
fn direct_parse(text: &str) -> Option<Extracted> {
    parse_object(text.trim())
}

// Strategy 2: first ``` fence, language tag optional and case-insensitive.
fn fenced_block_parse(text: &str) -> Option<Extracted> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let end = after.find("```")?;
    let mut inner = &after[..end];

    // Drop a bare language hint (```json, ```JSON, or nothing) on the fence
    // line; anything else on that line belongs to the payload.
    if let Some(newline) = inner.find('\n') {
        if inner[..newline]
            .trim()
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric())
        {
            inner = &inner[newline + 1..];
        }
    }
    parse_object(inner.trim())
}

// Strategy 3: first balanced `{…}` region, tracking nesting depth and JSON
// string state so braces inside string values do not unbalance the scan.
fn brace_scan_parse(text: &str) -> Option<Extracted> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return parse_object(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(candidate: &str) -> Option<Extracted> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_fenced_and_embedded_content_agree() {
        let expected = json!({"title": "T"});
        for text in [
            r#"{"title":"T"}"#.to_string(),
            "```json\n{\"title\":\"T\"}\n```".to_string(),
            r#"noise {"title":"T"} noise"#.to_string(),
        ] {
            let map = extract(&text, 3).expect("should extract");
            assert_eq!(Value::Object(map), expected, "input: {text}");
        }
    }

    #[test]
    fn prose_without_json_fails() {
        assert!(extract("not json at all", 3).is_err());
    }

    #[test]
    fn uppercase_fence_tag_and_leading_whitespace_still_extract() {
        let text = "  \n```JSON\n{\"title\":\"X\",\"features\":[]}\n```\n";
        let map = extract(text, 3).expect("should extract");
        assert_eq!(map.get("title"), Some(&json!("X")));
        assert_eq!(map.get("features"), Some(&json!([])));
    }

    #[test]
    fn untagged_fence_is_accepted() {
        let map = extract("```\n{\"a\": 1}\n```", 3).expect("should extract");
        assert_eq!(map.get("a"), Some(&json!(1)));
    }

    #[test]
    fn first_of_multiple_fenced_blocks_wins() {
        let text = "```json\n{\"which\":\"first\"}\n```\nand\n```json\n{\"which\":\"second\"}\n```";
        let map = extract(text, 3).expect("should extract");
        assert_eq!(map.get("which"), Some(&json!("first")));
    }

    #[test]
    fn brace_scan_handles_nesting_and_braces_inside_strings() {
        let text = r#"Sure! Here you go: {"outer": {"inner": "has } brace"}, "n": 2} enjoy"#;
        let map = extract(text, 3).expect("should extract");
        assert_eq!(
            map.get("outer"),
            Some(&json!({"inner": "has } brace"}))
        );
        assert_eq!(map.get("n"), Some(&json!(2)));
    }

    #[test]
    fn direct_parse_rejects_text_with_trailing_noise() {
        assert!(direct_parse(r#"{"a":1} trailing"#).is_none());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(extract("[1, 2, 3]", 3).is_err());
        assert!(extract("\"just a string\"", 3).is_err());
    }

    #[test]
    fn attempt_bound_cuts_off_looser_strategies() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert!(extract(fenced, 1).is_err());
        assert!(extract(fenced, 2).is_ok());
        // A zero bound still tries the strictest strategy.
        assert!(extract(r#"{"a":1}"#, 0).is_ok());
    }

    #[test]
    fn malformed_fence_falls_through_to_brace_scan() {
        // The fence payload alone is not valid JSON, but the brace region is.
        let text = "```json oops {\"a\": 1} ```";
        let map = extract(text, 3).expect("should extract");
        assert_eq!(map.get("a"), Some(&json!(1)));
    }

    #[test]
    fn extract_fields_substitutes_defaults_for_missing_keys() {
        let data = json!({"title": "T", "features": ["f"]});
        let picked = extract_fields(
            data.as_object().expect("object"),
            &["title", "description", "features"],
            &Value::Null,
        );
        assert_eq!(picked.get("title"), Some(&json!("T")));
        assert_eq!(picked.get("description"), Some(&Value::Null));
        assert_eq!(picked.get("features"), Some(&json!(["f"])));
    }
}
