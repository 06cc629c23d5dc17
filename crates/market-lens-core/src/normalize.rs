//! Fills a raw chart configuration with deterministic defaults so a renderer
//! always receives something displayable.
//!
//! Every step only adds what is missing; a field present in the input is
//! never replaced. That makes [`normalize`] idempotent.

use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::warn;

use crate::chart::ChartConfig;

pub const DEFAULT_PALETTE: [&str; 10] = [
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#8B5CF6", "#06B6D4", "#84CC16", "#F97316",
    "#EC4899", "#6B7280",
];

pub const DEFAULT_TITLE: &str = "Chart Analysis";

/// First synthesized category label is `Year 2020`.
const LABEL_BASE_YEAR: usize = 2020;

pub fn normalize(config: ChartConfig) -> ChartConfig {
    let mut map = match config.into_value() {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    derive_legend(&mut map);
    apply_palette(&mut map);
    synthesize_axis_labels(&mut map);
    default_value_axis(&mut map);
    default_title(&mut map);
    layer_presentation_defaults(&mut map);

    let normalized = ChartConfig::new(map);
    warn_on_misaligned_series(&normalized);
    normalized
}

fn series_mut(map: &mut Map<String, Value>) -> Option<&mut Vec<Value>> {
    map.get_mut("series").and_then(Value::as_array_mut)
}

/// `obj[key]` as an object, inserting `{}` when the key is absent.
/// `None` when the key holds something other than an object.
fn object_entry<'a>(obj: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    obj.entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

fn derive_legend(map: &mut Map<String, Value>) {
    let has_series = map
        .get("series")
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    let has_labels = map.get("legend").and_then(|l| l.get("data")).is_some();
    if !has_series || has_labels {
        return;
    }

    let names = ChartConfig::new(map.clone()).series_names();
    if let Some(legend) = object_entry(map, "legend") {
        legend.insert("data".to_string(), json!(names));
    }
}

fn apply_palette(map: &mut Map<String, Value>) {
    if !map.contains_key("color") {
        map.insert("color".to_string(), json!(DEFAULT_PALETTE));
    }

    let palette: Vec<Value> = map
        .get("color")
        .and_then(Value::as_array)
        .map(|colors| colors.iter().filter(|c| c.is_string()).cloned().collect())
        .filter(|colors: &Vec<Value>| !colors.is_empty())
        .unwrap_or_else(|| DEFAULT_PALETTE.iter().map(|c| json!(c)).collect());

    let Some(series) = series_mut(map) else {
        return;
    };
    for (index, entry) in series.iter_mut().enumerate() {
        let Some(entry) = entry.as_object_mut() else {
            continue;
        };
        let Some(style) = object_entry(entry, "itemStyle") else {
            continue;
        };
        style
            .entry("color".to_string())
            .or_insert_with(|| palette[index % palette.len()].clone());
    }
}

fn synthesize_axis_labels(map: &mut Map<String, Value>) {
    let config = ChartConfig::new(map.clone());
    if config.axis_labels().is_some() {
        return;
    }
    let Some(length) = config
        .series()
        .first()
        .and_then(|s| s.get("data"))
        .and_then(Value::as_array)
        .map(Vec::len)
    else {
        return;
    };

    let axis = match map
        .entry("xAxis".to_string())
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Array(axes) => match axes.first_mut() {
            Some(first) => first,
            None => return,
        },
        axis => axis,
    };
    let Some(axis) = axis.as_object_mut() else {
        return;
    };

    // A value-typed x axis is a horizontal chart; its labels live elsewhere.
    match axis.get("type").and_then(Value::as_str) {
        None => {
            axis.insert("type".to_string(), json!("category"));
        }
        Some("category") => {}
        Some(_) => return,
    }

    let labels: Vec<String> = (0..length)
        .map(|i| format!("Year {}", LABEL_BASE_YEAR + i))
        .collect();
    axis.insert("data".to_string(), json!(labels));
}

fn default_value_axis(map: &mut Map<String, Value>) {
    if !map.contains_key("yAxis") {
        map.insert("yAxis".to_string(), json!({"type": "value", "name": "Value"}));
    }
}

/// Any string title counts as given, the empty string included.
fn default_title(map: &mut Map<String, Value>) {
    let given = map
        .get("title")
        .and_then(|t| t.get("text"))
        .is_some_and(Value::is_string);
    if given {
        return;
    }
    if let Some(title) = object_entry(map, "title") {
        title.insert("text".to_string(), json!(DEFAULT_TITLE));
    }
}

static PRESENTATION: OnceLock<Value> = OnceLock::new();

fn presentation_defaults() -> &'static Value {
    PRESENTATION.get_or_init(|| {
        json!({
            "title": {
                "left": "center",
                "top": "20px",
                "textStyle": {"fontSize": 18, "fontWeight": "bold", "color": "#1F2937"},
                "subtextStyle": {"fontSize": 12, "color": "#6B7280"}
            },
            "legend": {
                "show": true,
                "bottom": "10px",
                "left": "center",
                "orient": "horizontal",
                "itemGap": 25,
                "itemWidth": 14,
                "itemHeight": 14,
                "selectedMode": true,
                "textStyle": {"fontSize": 12, "color": "#374151", "fontWeight": "500"},
                "backgroundColor": "rgba(255, 255, 255, 0.8)",
                "borderColor": "#E5E7EB",
                "borderWidth": 1,
                "borderRadius": 8,
                "padding": [8, 12],
                "shadowBlur": 4,
                "shadowColor": "rgba(0, 0, 0, 0.1)"
            },
            "grid": {
                "top": "100px",
                "left": "4%",
                "right": "4%",
                "bottom": "15%",
                "containLabel": true,
                "backgroundColor": "transparent",
                "borderColor": "#E5E7EB",
                "borderWidth": 1
            },
            "tooltip": {
                "trigger": "axis",
                "backgroundColor": "rgba(255, 255, 255, 0.98)",
                "borderColor": "#D1D5DB",
                "borderWidth": 1,
                "borderRadius": 8,
                "textStyle": {"color": "#374151", "fontSize": 12, "fontWeight": "500"},
                "axisPointer": {
                    "type": "shadow",
                    "shadowStyle": {"color": "rgba(0, 0, 0, 0.1)", "opacity": 0.3}
                }
            },
            "xAxis": {
                "nameLocation": "middle",
                "nameGap": 30,
                "nameTextStyle": {"color": "#374151", "fontSize": 12},
                "axisLabel": {"color": "#6B7280", "fontSize": 11, "rotate": 0},
                "axisLine": {"show": true, "lineStyle": {"color": "#D1D5DB", "width": 1}},
                "axisTick": {"show": true, "alignWithLabel": true}
            },
            "yAxis": {
                "nameLocation": "middle",
                "nameGap": 50,
                "nameTextStyle": {"color": "#374151", "fontSize": 12},
                "axisLabel": {"color": "#6B7280", "fontSize": 11},
                "axisLine": {"show": true, "lineStyle": {"color": "#D1D5DB", "width": 1}},
                "splitLine": {
                    "show": true,
                    "lineStyle": {"color": "#F3F4F6", "type": "dashed", "opacity": 0.5}
                }
            },
            "textStyle": {
                "color": "#374151",
                "fontSize": 12,
                "fontFamily": "'Inter', 'Segoe UI', 'Roboto', sans-serif"
            },
            "animation": true,
            "animationDuration": 1000,
            "animationEasing": "cubicOut"
        })
    })
}

fn series_defaults(kind: Option<&str>) -> Value {
    let mut item_style = json!({"borderWidth": 0});
    if kind == Some("bar") {
        item_style["borderRadius"] = json!([4, 4, 0, 0]);
    }
    json!({
        "itemStyle": item_style,
        "emphasis": {"itemStyle": {"shadowBlur": 10, "shadowColor": "rgba(0, 0, 0, 0.2)"}},
        "label": {"show": false, "position": "top", "color": "#374151", "fontSize": 10}
    })
}

/// Recursively lays `input` over `defaults`. Input wins on every collision;
/// only object-with-object pairs merge deeper.
fn overlay(defaults: &Value, input: Value) -> Value {
    match (defaults, input) {
        (Value::Object(base), Value::Object(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let value = match base.get(&key) {
                    Some(default) => overlay(default, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, input) => input,
    }
}

fn layer_presentation_defaults(map: &mut Map<String, Value>) {
    let Value::Object(defaults) = presentation_defaults() else {
        return;
    };

    for (key, default) in defaults {
        let merged = match map.remove(key) {
            // Axis lists get the axis defaults per entry.
            Some(Value::Array(items)) if default.is_object() => Value::Array(
                items.into_iter().map(|item| overlay(default, item)).collect(),
            ),
            Some(value) => overlay(default, value),
            None => default.clone(),
        };
        map.insert(key.clone(), merged);
    }

    if let Some(series) = series_mut(map) {
        for entry in series.iter_mut() {
            let kind = entry.get("type").and_then(Value::as_str).map(str::to_string);
            let current = std::mem::take(entry);
            *entry = overlay(&series_defaults(kind.as_deref()), current);
        }
    }
}

/// Mismatched lengths are tolerated; the renderer pads or truncates.
fn warn_on_misaligned_series(config: &ChartConfig) {
    let Some(labels) = config.axis_labels() else {
        return;
    };
    for series in config.series() {
        let Some(data) = series.get("data").and_then(Value::as_array) else {
            continue;
        };
        if data.len() != labels.len() {
            let name = series
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<unnamed>");
            warn!(
                series = name,
                points = data.len(),
                labels = labels.len(),
                "series length does not match category axis"
            );
        }
    }
}
