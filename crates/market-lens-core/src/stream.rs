//! Streamed answers: a line decoder for `data: <json>` records and the fold
//! of decoded events into a [`Conversation`].

use serde_json::Value;
use tracing::{debug, warn};

use crate::chart::ChartConfig;
use crate::conversation::Conversation;
use crate::error::Result;
use crate::locale::Locale;

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    /// Raw JSON text of a chart configuration.
    Chart(String),
    Status(String),
    Error(String),
}

/// Turns arbitrary byte chunks into events. Only complete lines are decoded;
/// the remainder, including a split UTF-8 sequence, waits for the next chunk.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = decode_line(&line[..newline]) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever unterminated line is left at end of stream.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<StreamEvent> {
    let line = match std::str::from_utf8(bytes) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            warn!("skipping stream line with invalid UTF-8: {}", e);
            return None;
        }
    };
    if line.trim().is_empty() {
        return None;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        debug!(line, "skipping non-data stream line");
        return None;
    };
    parse_event(payload.trim_start())
}

/// Classifies one JSON record `{ "type": ..., "data": ... }`.
pub fn parse_event(payload: &str) -> Option<StreamEvent> {
    let record: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("skipping malformed stream record: {}", e);
            return None;
        }
    };
    let Some(kind) = record.get("type").and_then(Value::as_str) else {
        debug!("skipping stream record without a type");
        return None;
    };

    let data = match record.get("data") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };

    match kind {
        "content" => Some(StreamEvent::Content(data)),
        "chart" => Some(StreamEvent::Chart(data)),
        "status" => Some(StreamEvent::Status(data)),
        "error" => Some(StreamEvent::Error(data)),
        other => {
            debug!(kind = other, "ignoring stream event");
            None
        }
    }
}

/// What applying one event changed, for the caller's UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyEffect {
    pub stop_loading: bool,
    pub chart_updated: bool,
}

/// Folds the events of one streamed answer into the assistant message
/// `message_id`, which must already exist in the conversation.
#[derive(Debug, Clone)]
pub struct StreamAssembler {
    message_id: String,
    locale: Locale,
    received_content: bool,
}

impl StreamAssembler {
    pub fn new(message_id: impl Into<String>, locale: Locale) -> Self {
        Self {
            message_id: message_id.into(),
            locale,
            received_content: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn apply(&mut self, conversation: &mut Conversation, event: StreamEvent) -> Result<AssemblyEffect> {
        let mut effect = AssemblyEffect::default();

        match event {
            StreamEvent::Content(text) => {
                conversation.append_to(&self.message_id, &text)?;
                if !self.received_content {
                    self.received_content = true;
                    effect.stop_loading = true;
                }
            }
            StreamEvent::Chart(raw) => match chart_from_payload(&raw) {
                Some(config) => {
                    conversation.set_chart(config);
                    effect.chart_updated = true;
                }
                None => warn!("discarding unparseable chart event"),
            },
            StreamEvent::Status(text) => {
                self.append_note(conversation, &format!("*{}*", text.trim()))?;
                effect.stop_loading = true;
            }
            StreamEvent::Error(text) => {
                let note = format!("**{}:** {}", self.locale.error_label(), text.trim());
                self.append_note(conversation, &note)?;
                effect.stop_loading = true;
            }
        }

        if effect.stop_loading {
            conversation.loading = false;
        }
        Ok(effect)
    }

    pub fn finish(&self, conversation: &mut Conversation) -> Result<()> {
        conversation.finish(&self.message_id)
    }

    /// Notes go on their own line.
    fn append_note(&self, conversation: &mut Conversation, note: &str) -> Result<()> {
        let needs_break = conversation
            .message(&self.message_id)
            .is_some_and(|m| !m.content.is_empty() && !m.content.ends_with('\n'));
        let text = if needs_break {
            format!("\n{}\n", note)
        } else {
            format!("{}\n", note)
        };
        conversation.append_to(&self.message_id, &text)?;
        Ok(())
    }
}

/// Accepts `{"chartConfig": {...}}` or a bare config object.
fn chart_from_payload(raw: &str) -> Option<ChartConfig> {
    let mut value: Value = serde_json::from_str(raw)
        .map_err(|e| warn!("chart event is not JSON: {}", e))
        .ok()?;
    if let Some(inner) = value.get_mut("chartConfig") {
        value = inner.take();
    }
    ChartConfig::from_value(value)
}
