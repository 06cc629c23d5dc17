//! Locating and parsing the embedded `{"chartConfig": {...}}` payload.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::chart::ChartConfig;

pub(crate) const CHART_KEY: &str = "\"chartConfig\"";

/// Tokens an assistant leaves in `series[].data` when it echoes the prompt
/// template instead of filling in numbers.
const PLACEHOLDER_TOKENS: &[&str] = &["values", "[values]", "value", "[value]", "..."];

static FENCE_PATTERN: OnceLock<Regex> = OnceLock::new();
static KEYED_OBJECT_PATTERN: OnceLock<Regex> = OnceLock::new();

pub(crate) fn fence_pattern() -> &'static Regex {
    FENCE_PATTERN.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap())
}

fn keyed_object_pattern() -> &'static Regex {
    KEYED_OBJECT_PATTERN
        .get_or_init(|| Regex::new(r#"(?s)\{\s*"chartConfig"\s*:\s*\{.*?\}\s*\}"#).unwrap())
}

/// One tier of the fallback chain: finds candidate JSON snippets in the text.
struct Strategy {
    name: &'static str,
    candidates: fn(&str) -> Vec<&str>,
}

/// Tried strictly in this order; the first tier whose candidate parses wins.
const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "fenced-block",
        candidates: fenced_candidates,
    },
    Strategy {
        name: "keyed-object",
        candidates: keyed_object_candidates,
    },
    Strategy {
        name: "enclosing-span",
        candidates: enclosing_span_candidates,
    },
];

/// Runs the strategies in order and returns the first parsed chart config.
pub(crate) fn find_chart_config(text: &str) -> Option<ChartConfig> {
    if !text.contains(CHART_KEY) {
        return None;
    }

    first_success(STRATEGIES, text, parse_candidate)
}

fn first_success<T>(
    strategies: &[Strategy],
    text: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    for strategy in strategies {
        for candidate in (strategy.candidates)(text) {
            if let Some(found) = parse(candidate) {
                debug!(tier = strategy.name, "chart config extracted");
                return Some(found);
            }
            debug!(tier = strategy.name, "candidate did not parse, falling through");
        }
    }
    None
}

fn fenced_candidates(text: &str) -> Vec<&str> {
    fence_pattern()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
        .filter(|body| body.contains(CHART_KEY))
        .collect()
}

fn keyed_object_candidates(text: &str) -> Vec<&str> {
    keyed_object_pattern()
        .find_iter(text)
        .map(|m| m.as_str())
        .collect()
}

fn enclosing_span_candidates(text: &str) -> Vec<&str> {
    text.match_indices(CHART_KEY)
        .flat_map(|(key_at, _)| enclosing_object_spans(text, key_at))
        .map(|(start, end)| &text[start..end])
        .collect()
}

/// Byte range of the innermost `{ ... }` object that encloses the key at
/// `key_at`.
pub(crate) fn enclosing_object_span(text: &str, key_at: usize) -> Option<(usize, usize)> {
    enclosing_object_spans(text, key_at).into_iter().next()
}

/// Every `{ ... }` object that encloses the key, innermost first.
///
/// Each `{` before the key is scanned forward to its balanced close
/// (string-aware), so braces inside strings never end an object early. When
/// no object balances, the nearest unbalanced one runs to the last `}`.
fn enclosing_object_spans(text: &str, key_at: usize) -> Vec<(usize, usize)> {
    let opens: Vec<usize> = text[..key_at]
        .match_indices('{')
        .map(|(i, _)| i)
        .rev()
        .collect();

    let mut unbalanced = None;
    let mut spans = Vec::new();
    for &start in &opens {
        match balanced_object_end(text, start) {
            Some(end) if end > key_at => spans.push((start, end)),
            Some(_) => {}
            None => {
                unbalanced.get_or_insert(start);
            }
        }
    }

    if spans.is_empty() {
        if let Some(start) = unbalanced {
            if let Some(close) = text.rfind('}').filter(|&i| i > key_at) {
                spans.push((start, close + 1));
            }
        }
    }
    spans
}

/// Given the index of an opening `{`, returns the index just past its
/// matching `}`.
pub(crate) fn balanced_object_end(text: &str, open_at: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[open_at..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_at + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Removes every chart payload from `text`: fenced blocks mentioning the
/// key, then any bare object enclosing it.
pub(crate) fn remove_chart_payloads(text: &str) -> String {
    let without_fences = fence_pattern().replace_all(text, |caps: &regex::Captures| {
        let body = caps.get(1).map_or("", |m| m.as_str());
        if body.contains(CHART_KEY) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    let mut out = without_fences.into_owned();
    let mut search_from = 0;
    while let Some(found) = out[search_from..].find(CHART_KEY) {
        let key_at = search_from + found;
        match enclosing_object_span(&out, key_at) {
            Some((start, end)) => {
                out.replace_range(start..end, "");
                search_from = start;
            }
            None => search_from = key_at + CHART_KEY.len(),
        }
    }
    out
}

fn parse_candidate(candidate: &str) -> Option<ChartConfig> {
    let cleaned = clean_json(candidate);
    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "discarding unparseable chart config candidate");
            return None;
        }
    };
    let config = value.get("chartConfig").cloned()?;
    ChartConfig::from_value(config)
}

/// Normalizes LLM-flavoured JSON before parsing: non-printable characters,
/// comments and trailing commas are removed. Running it twice is a no-op.
pub fn clean_json(candidate: &str) -> String {
    let printable = replace_non_printable(candidate);
    let without_comments = strip_comments(&printable);
    strip_trailing_commas(&without_comments).trim().to_string()
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{00ad}'
    )
}

/// Control and zero-width characters become plain spaces so that removing
/// them can never glue two tokens together.
fn replace_non_printable(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            let keep = matches!(c, '\n' | '\r' | '\t') || !(c.is_control() || is_invisible(c));
            if keep {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..]
                .iter()
                .find(|n| !n.is_whitespace() && **n != ',');
            if matches!(next, Some(&'}') | Some(&']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

/// True when any series carries a template token instead of numbers.
pub(crate) fn has_placeholder_series(config: &ChartConfig) -> bool {
    config.series().iter().any(|series| match series.get("data") {
        Some(Value::String(s)) => is_placeholder(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::String(s) if is_placeholder(s))),
        _ => false,
    })
}

fn is_placeholder(token: &str) -> bool {
    let token = token.trim().to_ascii_lowercase();
    PLACEHOLDER_TOKENS.contains(&token.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_block_wins() {
        let text = "Intro\n```json\n{\"chartConfig\": {\"title\": {\"text\": \"A\"}}}\n```\n\
                    and later {\"chartConfig\": {\"title\": {\"text\": \"B\"}}}";
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.title_text(), Some("A"));
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\n{\"chartConfig\": {\"series\": []}}\n```";
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.into_value(), json!({"series": []}));
    }

    #[test]
    fn test_skips_fences_without_key() {
        let text = "```json\n{\"other\": 1}\n```\n```json\n{\"chartConfig\": {\"color\": []}}\n```";
        let config = find_chart_config(text).unwrap();
        assert!(config.get("color").is_some());
    }

    #[test]
    fn test_keyed_object_without_fence() {
        let text = "Here: {\"chartConfig\": {\"animation\": false}} done";
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.get("animation"), Some(&json!(false)));
    }

    #[test]
    fn test_broken_fence_falls_through_to_later_tier() {
        // The fenced copy is truncated; the bare copy further down is intact.
        let text = "```json\n{\"chartConfig\": {\"title\": \n```\n\
                    {\"chartConfig\": {\"title\": {\"text\": \"Nested\"}, \"series\": [{\"data\": [1]}]}}";
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.title_text(), Some("Nested"));
        assert_eq!(config.series().len(), 1);
    }

    #[test]
    fn test_enclosing_span_handles_nested_objects() {
        let text = "prefix {\"meta\": 1, \"chartConfig\": {\"xAxis\": {\"data\": [\"a\"]}}} suffix";
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.axis_labels().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_enclosing_span_ignores_braces_inside_strings() {
        let text = r#"Result: {"note": "see }", "chartConfig": {"title": {"text": "A"}}} end"#;
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.title_text(), Some("A"));

        let text = r#"Result: {"note": "a { b \" c", "chartConfig": {"animation": true}} end"#;
        let config = find_chart_config(text).unwrap();
        assert_eq!(config.get("animation"), Some(&json!(true)));
    }

    #[test]
    fn test_unbalanced_object_runs_to_last_brace() {
        let text = "{\"chartConfig\": {\"a\": 1} trailing";
        let key_at = text.find(CHART_KEY).unwrap();
        let close = text.rfind('}').unwrap();
        assert_eq!(enclosing_object_span(text, key_at), Some((0, close + 1)));
    }

    #[test]
    fn test_no_key_means_none() {
        assert!(find_chart_config("{\"series\": []}").is_none());
        assert!(find_chart_config("plain prose").is_none());
    }

    #[test]
    fn test_key_with_non_object_value_is_rejected() {
        assert!(find_chart_config("{\"chartConfig\": [1, 2]}").is_none());
    }

    #[test]
    fn test_clean_json_strips_noise() {
        let raw = "{\n  \"a\": 1, // trailing note\n  /* block */ \"b\": [1, 2,],\n}";
        let cleaned = clean_json(raw);
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn test_clean_json_keeps_comment_markers_inside_strings() {
        let raw = r#"{"url": "https://example.com/a,]", "t": "/* not a comment */"}"#;
        let value: Value = serde_json::from_str(&clean_json(raw)).unwrap();
        assert_eq!(value["url"], "https://example.com/a,]");
        assert_eq!(value["t"], "/* not a comment */");
    }

    #[test]
    fn test_clean_json_replaces_control_characters() {
        let raw = "{\u{feff}\"a\":\u{0007} 1}";
        let value: Value = serde_json::from_str(&clean_json(raw)).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_clean_json_is_idempotent() {
        let samples = [
            "{\"a\": [1,,], // x\n}",
            "[1, /* c */ ,]",
            "/ /* x */ / {\"b\": \"//\"}",
            "{\"s\": \"unterminated",
            "{,\u{0000}}",
            "/*/ never closed",
        ];
        for sample in samples {
            let once = clean_json(sample);
            assert_eq!(clean_json(&once), once, "sample: {:?}", sample);
        }
    }

    #[test]
    fn test_remove_chart_payloads() {
        let text = "A\n```json\n{\"chartConfig\": {}}\n```\nB {\"chartConfig\": {\"x\": {}}} C\n```\ncode\n```";
        let out = remove_chart_payloads(text);
        assert!(!out.contains("chartConfig"));
        assert!(out.contains("A\n"));
        assert!(out.contains("B  C"));
        assert!(out.contains("```\ncode\n```"));
    }

    #[test]
    fn test_placeholder_detection() {
        let placeholder = ChartConfig::from_value(json!({
            "series": [{"data": "[values]"}]
        }))
        .unwrap();
        assert!(has_placeholder_series(&placeholder));

        let listed = ChartConfig::from_value(json!({
            "series": [{"data": [1, 2]}, {"data": ["values"]}]
        }))
        .unwrap();
        assert!(has_placeholder_series(&listed));

        let real = ChartConfig::from_value(json!({
            "series": [{"data": [1, 2]}]
        }))
        .unwrap();
        assert!(!has_placeholder_series(&real));
    }
}
