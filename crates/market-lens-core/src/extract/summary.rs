//! Market Trend Summary capture, cleanup and the validity filter.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

use super::chart_block::{balanced_object_end, remove_chart_payloads};

static TREND_MARKER: OnceLock<Regex> = OnceLock::new();
static SUMMARY_MARKER: OnceLock<Regex> = OnceLock::new();
static STRUCTURED_MARKER: OnceLock<Regex> = OnceLock::new();
static NEXT_HEADING: OnceLock<Regex> = OnceLock::new();
static GRAPHIC_SECTION: OnceLock<Regex> = OnceLock::new();

pub(crate) fn trend_marker() -> &'static Regex {
    TREND_MARKER.get_or_init(|| {
        Regex::new(r"(?i)\*\*\s*Market Trend Summary\s*:?\s*\*\*:?").unwrap()
    })
}

pub(crate) fn summary_marker() -> &'static Regex {
    SUMMARY_MARKER.get_or_init(|| Regex::new(r"(?i)\*\*\s*Summary\s*:?\s*\*\*:?").unwrap())
}

fn structured_marker() -> &'static Regex {
    STRUCTURED_MARKER.get_or_init(|| Regex::new(r"(?i)Market Summary:\s*\{").unwrap())
}

/// A bolded span at the start of a line, e.g. `**Graphic Configuration:**`.
fn next_heading() -> &'static Regex {
    NEXT_HEADING.get_or_init(|| Regex::new(r"(?m)^[ \t]*\*\*[^*\n]+\*\*").unwrap())
}

fn graphic_section() -> &'static Regex {
    GRAPHIC_SECTION.get_or_init(|| {
        Regex::new(r"(?is)(?:\*\*\s*)?Graphic Configuration\s*:?(?:\s*\*\*)?.*$").unwrap()
    })
}

/// Byte ranges of every section opened by `marker`: the marker itself plus
/// its body, which runs to the next line-leading bold heading, the next
/// marker, or the end. Ranges never overlap.
pub(crate) fn section_ranges(text: &str, marker: &Regex) -> Vec<(Range<usize>, Range<usize>)> {
    let markers: Vec<_> = marker.find_iter(text).collect();
    markers
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let limit = markers.get(i + 1).map_or(text.len(), |next| next.start());
            let body_end = next_heading()
                .find_at(text, m.end())
                .map_or(text.len(), |h| h.start())
                .min(limit);
            (m.start()..body_end, m.end()..body_end)
        })
        .collect()
}

fn first_section_body<'a>(text: &'a str, marker: &Regex) -> Option<&'a str> {
    section_ranges(text, marker)
        .into_iter()
        .next()
        .map(|(_, body)| &text[body])
}

/// Finds the market summary: `**Market Trend Summary:**`, then `**Summary:**`,
/// then a structured `Market Summary: {"marketSummary": ...}` object.
pub(crate) fn find_summary(text: &str) -> Option<String> {
    let captured = first_section_body(text, trend_marker())
        .or_else(|| first_section_body(text, summary_marker()));

    if let Some(body) = captured {
        let cleaned = clean_summary_body(body);
        if cleaned.is_empty() {
            debug!("summary marker present but section is empty");
            return None;
        }
        return Some(cleaned);
    }

    structured_summary(text)
}

/// Drops a trailing "Graphic Configuration" section and any chart payload
/// so the summary never duplicates the chart.
fn clean_summary_body(body: &str) -> String {
    let without_graphic = graphic_section().replace(body, "");
    remove_chart_payloads(&without_graphic).trim().to_string()
}

fn structured_summary(text: &str) -> Option<String> {
    let marker = structured_marker().find(text)?;
    let open_at = marker.end() - 1;
    let end = balanced_object_end(text, open_at)?;
    let parsed: Value = match serde_json::from_str(&text[open_at..end]) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "structured market summary did not parse");
            return None;
        }
    };
    let summary = parsed.get("marketSummary")?.as_object()?;

    let mut out = String::new();
    let field = |key: &str| {
        summary
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    };
    let list = |key: &str| {
        summary
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default()
    };

    if let Some(title) = field("title") {
        out.push_str(&format!("**{}**\n\n", title));
    }
    if let Some(trend) = field("historicalTrend") {
        out.push_str(&format!("**Historical Trend:**\n{}\n\n", trend));
    }
    if let Some(outlook) = field("forecastOutlook") {
        out.push_str(&format!("**Forecast Outlook:**\n{}\n\n", outlook));
    }
    for (key, heading) in [
        ("keyFindings", "Key Findings"),
        ("insights", "Insights"),
        ("recommendations", "Recommendations"),
    ] {
        let items = list(key);
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("**{}:**\n", heading));
        for item in items {
            out.push_str(&format!("• {}\n", item));
        }
        out.push('\n');
    }

    let out = out.trim().to_string();
    (!out.is_empty()).then_some(out)
}

/// Decides whether a candidate string is a genuine market summary rather
/// than an API envelope or assistant small talk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryPolicy {
    /// Candidates must be strictly longer than this many characters.
    pub min_length: usize,
    /// At least one must appear (case-insensitive).
    pub keywords: Vec<String>,
    /// None may appear (case-insensitive).
    pub chatter_phrases: Vec<String>,
    /// A JSON object carrying any of these keys is a raw response envelope.
    pub envelope_keys: Vec<String>,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            min_length: 200,
            keywords: owned(&[
                "market trend summary",
                "forecast",
                "insights",
                "recommendations",
                "historical trend",
                "market size",
                "growth rate",
                "cagr",
            ]),
            chatter_phrases: owned(&[
                "how can i help",
                "how can i assist",
                "how may i help",
                "how may i assist",
                "i'm here to help",
                "i am here to help",
                "feel free to ask",
                "is there anything else",
                "hello! i'm",
                "hi there",
            ]),
            envelope_keys: owned(&["answer", "message_id", "status"]),
        }
    }
}

impl SummaryPolicy {
    pub fn accepts(&self, candidate: &str) -> bool {
        let trimmed = candidate.trim();

        if self.is_envelope(trimmed) {
            debug!("summary rejected: raw response envelope");
            return false;
        }

        let lower = trimmed.to_lowercase();
        if let Some(phrase) = self
            .chatter_phrases
            .iter()
            .find(|p| lower.contains(&p.to_lowercase()))
        {
            debug!(phrase = %phrase, "summary rejected: generic assistant chatter");
            return false;
        }

        if !self.keywords.iter().any(|k| lower.contains(&k.to_lowercase())) {
            debug!("summary rejected: no domain keyword");
            return false;
        }

        let length = trimmed.chars().count();
        if length <= self.min_length {
            debug!(length, min = self.min_length, "summary rejected: too short");
            return false;
        }

        true
    }

    fn is_envelope(&self, text: &str) -> bool {
        if !text.starts_with('{') {
            return false;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => self.envelope_keys.iter().any(|k| map.contains_key(k)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(text: &str, to: usize) -> String {
        let mut out = text.to_string();
        while out.chars().count() < to {
            out.push_str(" Demand for compact appliances keeps climbing.");
        }
        out
    }

    #[test]
    fn test_trend_summary_runs_to_end() {
        let text = "**Key Findings:**\n- a\n\n**Market Trend Summary:**\n- Growth is steady.\n- Japan saturates.";
        assert_eq!(
            find_summary(text).unwrap(),
            "- Growth is steady.\n- Japan saturates."
        );
    }

    #[test]
    fn test_trend_summary_stops_at_next_heading() {
        let text = "**Market Trend Summary:** Demand rose.\n**Insights & Recommendations:**\n- invest";
        assert_eq!(find_summary(text).unwrap(), "Demand rose.");
    }

    #[test]
    fn test_inline_bold_does_not_end_section() {
        let text = "**Market Trend Summary:**\n- Sales reach **12 million units** by 2028.";
        assert_eq!(
            find_summary(text).unwrap(),
            "- Sales reach **12 million units** by 2028."
        );
    }

    #[test]
    fn test_falls_back_to_plain_summary_marker() {
        let text = "Answer.\n**Summary:**\nShort wrap-up.";
        assert_eq!(find_summary(text).unwrap(), "Short wrap-up.");
    }

    #[test]
    fn test_trend_marker_preferred_over_summary() {
        let text = "**Summary:**\nfirst\n**Market Trend Summary:**\nsecond";
        assert_eq!(find_summary(text).unwrap(), "second");
    }

    #[test]
    fn test_marker_is_case_insensitive() {
        let text = "**market trend summary:**\nlower case works";
        assert_eq!(find_summary(text).unwrap(), "lower case works");
    }

    #[test]
    fn test_summary_excludes_inline_chart_block() {
        let text = "**Market Trend Summary:**\nRising.\n```json\n{\"chartConfig\": {\"series\": []}}\n```";
        assert_eq!(find_summary(text).unwrap(), "Rising.");
    }

    #[test]
    fn test_summary_excludes_unbolded_graphic_configuration() {
        let text = "**Market Trend Summary:**\nRising.\nGraphic Configuration: see below {\"chartConfig\": {}}";
        assert_eq!(find_summary(text).unwrap(), "Rising.");
    }

    #[test]
    fn test_no_marker_means_none() {
        assert!(find_summary("Just a plain answer without sections.").is_none());
    }

    #[test]
    fn test_empty_section_means_none() {
        assert!(find_summary("**Market Trend Summary:**\n**Next:** x").is_none());
    }

    #[test]
    fn test_structured_summary_is_rendered() {
        let text = r#"Market Summary: {"marketSummary": {"title": "Dryers", "historicalTrend": "Up 4%",
            "keyFindings": ["Japan flat", "China up"], "recommendations": []}}"#;
        let summary = find_summary(text).unwrap();
        assert!(summary.starts_with("**Dryers**"));
        assert!(summary.contains("**Historical Trend:**\nUp 4%"));
        assert!(summary.contains("• Japan flat\n• China up"));
        assert!(!summary.contains("Recommendations"));
    }

    #[test]
    fn test_policy_accepts_domain_summary() {
        let policy = SummaryPolicy::default();
        let text = pad("**Market Trend Summary:** The forecast shows steady growth.", 500);
        assert!(policy.accepts(&text));
    }

    #[test]
    fn test_policy_rejects_generic_greeting() {
        let policy = SummaryPolicy::default();
        let mut text = String::from("Hello! I'm your assistant. How can I help you today?");
        while text.chars().count() < 500 {
            text.push_str(" Feel free to ask me anything at all.");
        }
        assert!(!policy.accepts(&text));
    }

    #[test]
    fn test_policy_rejects_greeting_without_keywords_even_without_phrases() {
        let policy = SummaryPolicy::default();
        let text = pad("Thanks for stopping by.", 500);
        assert!(!policy.accepts(&text));
    }

    #[test]
    fn test_policy_rejects_short_text() {
        let policy = SummaryPolicy::default();
        assert!(!policy.accepts("The forecast is positive."));
    }

    #[test]
    fn test_policy_rejects_envelope() {
        let policy = SummaryPolicy::default();
        let body = pad("forecast", 300);
        let envelope = serde_json::json!({"answer": body, "message_id": "m1", "status": "ok"});
        assert!(!policy.accepts(&envelope.to_string()));
    }

    #[test]
    fn test_policy_threshold_is_configurable() {
        let policy = SummaryPolicy {
            min_length: 5,
            ..SummaryPolicy::default()
        };
        assert!(policy.accepts("forecast up"));
    }

    #[test]
    fn test_policy_deserializes_partial_overrides() {
        let policy: SummaryPolicy = serde_json::from_str(r#"{"min_length": 50}"#).unwrap();
        assert_eq!(policy.min_length, 50);
        assert_eq!(policy.keywords, SummaryPolicy::default().keywords);
    }
}
