//! Pulls structured pieces out of free-form assistant answers.
//!
//! Everything here is pure and never fails: a payload that cannot be found or
//! parsed comes back as `None` and the reason is logged.

mod chart_block;
mod summary;

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

use crate::chart::ChartConfig;

pub use chart_block::clean_json;
pub use summary::SummaryPolicy;

/// What one assistant answer yielded. Both halves are independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub chart_config: Option<ChartConfig>,
    pub summary_text: Option<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.chart_config.is_none() && self.summary_text.is_none()
    }
}

/// Extracts the embedded chart configuration and the market summary.
pub fn extract(content: &str) -> ExtractionResult {
    ExtractionResult {
        chart_config: chart_block::find_chart_config(content),
        summary_text: summary::find_summary(content),
    }
}

/// Like [`extract`], but a chart whose series still hold template
/// placeholders (`"data": "[values]"`) counts as no chart at all.
pub fn extract_strict(content: &str) -> ExtractionResult {
    let mut result = extract(content);
    if result
        .chart_config
        .as_ref()
        .is_some_and(chart_block::has_placeholder_series)
    {
        debug!("dropping chart config with placeholder series data");
        result.chart_config = None;
    }
    result
}

static GRAPHIC_HEADING: OnceLock<Regex> = OnceLock::new();
static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();

fn graphic_heading() -> &'static Regex {
    GRAPHIC_HEADING.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*\*\*\s*Graphic Configuration\s*:?\s*\*\*:?[ \t]*(?:\r?\n|$)")
            .unwrap()
    })
}

fn blank_runs() -> &'static Regex {
    BLANK_RUNS.get_or_init(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*){2,}").unwrap())
}

/// The message body as it should appear in the transcript: chart payloads,
/// their "Graphic Configuration" heading and the summary sections are
/// removed, since those are shown in their own panels.
pub fn strip_for_display(content: &str) -> String {
    let without_chart = chart_block::remove_chart_payloads(content);
    let without_heading = graphic_heading().replace_all(&without_chart, "");

    let mut text = without_heading.into_owned();
    for marker in [summary::trend_marker(), summary::summary_marker()] {
        let ranges = summary::section_ranges(&text, marker);
        for (section, _) in ranges.into_iter().rev() {
            text.replace_range(section, "");
        }
    }

    blank_runs().replace_all(&text, "\n\n").trim().to_string()
}
