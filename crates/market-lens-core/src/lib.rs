pub mod chart;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod locale;
pub mod normalize;
pub mod selection;
pub mod session;
pub mod stream;

// Re-export main types for convenience
pub use chart::{ChartConfig, ChartTable};
pub use client::MarketClient;
pub use config::Config;
pub use conversation::{ChatHistoryEntry, Conversation, Message, Role};
pub use error::{Error, Result};
pub use extract::{extract, extract_strict, strip_for_display, ExtractionResult, SummaryPolicy};
pub use locale::Locale;
pub use normalize::normalize;
pub use selection::{SelectionEvent, SelectionState, SelectionStep};
pub use session::{Session, TurnOutcome};
pub use stream::{AssemblyEffect, EventDecoder, StreamAssembler, StreamEvent};
