//! Guided category → subcategory → region selection.
//!
//! The flow is driven by explicit [`SelectionEvent`]s; nothing here looks at
//! assistant text to guess which step comes next.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::locale::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStep {
    #[default]
    AwaitingCategory,
    AwaitingSubcategory,
    AwaitingRegion,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    Category(String),
    Subcategory(String),
    /// One or more confirmed regions.
    Regions(Vec<String>),
    /// Counts as a single confirmed region.
    AllRegions,
    /// Re-opens the region step, keeping category and subcategory.
    ClearRegions,
}

impl SelectionEvent {
    fn name(&self) -> &'static str {
        match self {
            SelectionEvent::Category(_) => "category",
            SelectionEvent::Subcategory(_) => "subcategory",
            SelectionEvent::Regions(_) | SelectionEvent::AllRegions => "region",
            SelectionEvent::ClearRegions => "clear regions",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub region: Option<String>,
    step: SelectionStep,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> SelectionStep {
        self.step
    }

    pub fn is_complete(&self) -> bool {
        self.step == SelectionStep::Complete
    }

    /// Advances the flow. Returns the analysis question when the region,
    /// the last field, gets filled.
    pub fn apply(&mut self, event: SelectionEvent, locale: Locale) -> Result<Option<String>> {
        let out_of_order = Error::SelectionOutOfOrder {
            expected: self.step,
            got: event.name(),
        };

        match (self.step, event) {
            (SelectionStep::AwaitingCategory, SelectionEvent::Category(value)) => {
                self.category = Some(non_empty(value)?);
                self.step = SelectionStep::AwaitingSubcategory;
                Ok(None)
            }
            (SelectionStep::AwaitingSubcategory, SelectionEvent::Subcategory(value)) => {
                self.subcategory = Some(non_empty(value)?);
                self.step = SelectionStep::AwaitingRegion;
                Ok(None)
            }
            (SelectionStep::AwaitingRegion, SelectionEvent::Regions(values)) => {
                let regions: Vec<String> = values
                    .into_iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect();
                if regions.is_empty() {
                    return Err(Error::EmptySelection);
                }
                Ok(Some(self.complete(regions.join(", "), locale)))
            }
            (SelectionStep::AwaitingRegion, SelectionEvent::AllRegions) => {
                Ok(Some(self.complete(locale.all_regions().to_string(), locale)))
            }
            (SelectionStep::AwaitingRegion | SelectionStep::Complete, SelectionEvent::ClearRegions) => {
                self.region = None;
                self.step = SelectionStep::AwaitingRegion;
                Ok(None)
            }
            _ => Err(out_of_order),
        }
    }

    /// Back to the first step. Only a new top-level conversation does this.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn complete(&mut self, region: String, locale: Locale) -> String {
        let question = locale.analysis_question(
            self.category.as_deref().unwrap_or_default(),
            self.subcategory.as_deref().unwrap_or_default(),
            &region,
        );
        debug!(region = %region, "selection complete");
        self.region = Some(region);
        self.step = SelectionStep::Complete;
        question
    }
}

fn non_empty(value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptySelection);
    }
    Ok(trimmed.to_string())
}
