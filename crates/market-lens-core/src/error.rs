use thiserror::Error;

use crate::selection::SelectionStep;

/// Errors surfaced by the backend client, the session driver and configuration.
///
/// Parse problems inside assistant text never show up here: the extractor
/// degrades those to `None` and logs them instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{context} failed with status {status}: {body}")]
    Http {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("{context} timed out after {seconds}s")]
    Timeout { context: &'static str, seconds: u64 },

    #[error("{context} was cancelled")]
    Cancelled { context: &'static str },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Unknown locale '{0}' (expected 'ja' or 'en')")]
    UnknownLocale(String),

    #[error("Selection out of order: expected {expected:?}, got {got}")]
    SelectionOutOfOrder {
        expected: SelectionStep,
        got: &'static str,
    },

    #[error("Selection value must not be empty")]
    EmptySelection,

    #[error("No message with id {0}")]
    UnknownMessage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
