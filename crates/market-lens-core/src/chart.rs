//! Chart configuration value type and its tabular projection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A renderer-specific chart configuration (ECharts option shape).
///
/// The tree is kept as loose JSON: every field is optional and unknown
/// fields pass through untouched. Accessors below read the handful of
/// fields the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartConfig(Map<String, Value>);

impl ChartConfig {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn title_text(&self) -> Option<&str> {
        self.0
            .get("title")
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// The category axis. ECharts accepts either one axis object or a list
    /// of them; the first one is the category axis here.
    fn x_axis(&self) -> Option<&Value> {
        match self.0.get("xAxis")? {
            Value::Array(axes) => axes.first(),
            axis => Some(axis),
        }
    }

    /// Category labels from `xAxis.data`, stringified.
    pub fn axis_labels(&self) -> Option<Vec<String>> {
        let data = self.x_axis()?.get("data")?.as_array()?;
        Some(data.iter().map(value_to_label).collect())
    }

    pub fn series(&self) -> &[Value] {
        self.0
            .get("series")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn series_names(&self) -> Vec<String> {
        self.series()
            .iter()
            .filter_map(|s| s.get("name").and_then(Value::as_str))
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Projects the chart onto a table: one row per category label, one
    /// column per series, and a `Total` row when there is more than one
    /// series. Returns `None` without series or category labels.
    pub fn to_table(&self) -> Option<ChartTable> {
        let series = self.0.get("series")?.as_array()?;
        let labels = self.axis_labels()?;

        let category_header = self
            .x_axis()
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or("Category");

        let mut headers = vec![category_header.to_string()];
        headers.extend(series.iter().map(|s| {
            s.get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .unwrap_or("Series")
                .to_string()
        }));

        let mut rows: Vec<Vec<Cell>> = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| {
                let mut row = vec![Cell::Text(label)];
                for s in series {
                    let cell = s
                        .get("data")
                        .and_then(Value::as_array)
                        .and_then(|d| d.get(index))
                        .map(data_point_cell)
                        .unwrap_or(Cell::Number(0.0));
                    row.push(cell);
                }
                row
            })
            .collect();

        if series.len() > 1 {
            let mut total = vec![Cell::Text("Total".to_string())];
            for s in series {
                let sum: f64 = s
                    .get("data")
                    .and_then(Value::as_array)
                    .map(|d| d.iter().filter_map(data_point_number).sum())
                    .unwrap_or(0.0);
                total.push(Cell::Number(round2(sum)));
            }
            rows.push(total);
        }

        Some(ChartTable { headers, rows })
    }
}

impl From<ChartConfig> for Value {
    fn from(config: ChartConfig) -> Self {
        config.into_value()
    }
}

/// One cell of a [`ChartTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Text(text) => write!(f, "{}", text),
            Cell::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ChartTable {
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_string))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn value_to_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("value")
            .map(value_to_label)
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Series points are plain numbers or `{ "value": n }` objects.
fn data_point_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => obj.get("value").and_then(Value::as_f64),
        _ => None,
    }
}

fn data_point_cell(value: &Value) -> Cell {
    match data_point_number(value) {
        Some(n) => Cell::Number(round2(n)),
        None => match value {
            Value::String(s) => Cell::Text(s.clone()),
            _ => Cell::Number(0.0),
        },
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
