//! Conversation state: the message log plus whatever the latest answers
//! produced (chart, summary) and the guided selection.
//!
//! Messages are addressed by id, never by position, so an assistant message
//! can keep streaming while newer messages are appended after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chart::ChartConfig;
use crate::error::{Error, Result};
use crate::extract::{ExtractionResult, SummaryPolicy};
use crate::normalize::normalize;
use crate::selection::SelectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    streaming: bool,
}

impl Message {
    fn new(id: String, role: Role, content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            content,
            timestamp,
            streaming: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

/// Wire form of a message inside `conversation_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&Message> for ChatHistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: Some(message.timestamp),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pub current_chart: Option<ChartConfig>,
    pub current_summary: Option<String>,
    pub selection: SelectionState,
    pub loading: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::UnknownMessage(id.to_string()))
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.messages
            .push(Message::new(id.clone(), Role::User, content.into(), Utc::now()));
        id
    }

    /// A complete assistant message, e.g. a one-shot answer or an apology.
    pub fn push_assistant(
        &mut self,
        id: Option<String>,
        content: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> String {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.messages.push(Message::new(
            id.clone(),
            Role::Assistant,
            content.into(),
            timestamp.unwrap_or_else(Utc::now),
        ));
        id
    }

    /// Creates the empty assistant message a stream will fill in.
    pub fn begin_assistant(&mut self, id: Option<String>) -> String {
        let id = self.push_assistant(id, String::new(), None);
        if let Some(message) = self.messages.last_mut() {
            message.streaming = true;
        }
        id
    }

    /// Appends to a message that is still streaming. Returns `false` (and
    /// leaves the message alone) once streaming has finished.
    pub fn append_to(&mut self, id: &str, text: &str) -> Result<bool> {
        let message = self.message_mut(id)?;
        if !message.streaming {
            warn!(message_id = %id, "refusing to append to a finished message");
            return Ok(false);
        }
        message.content.push_str(text);
        Ok(true)
    }

    pub fn finish(&mut self, id: &str) -> Result<()> {
        let message = self.message_mut(id)?;
        message.streaming = false;
        debug!(message_id = %id, length = message.content.len(), "message finished");
        Ok(())
    }

    /// Normalizes and stores a chart for the chart panel.
    pub fn set_chart(&mut self, config: ChartConfig) {
        self.current_chart = Some(normalize(config));
    }

    /// Stores what extraction found. A missing half leaves the current value
    /// in place; a summary is kept only if `policy` accepts it.
    pub fn apply_extraction(&mut self, result: ExtractionResult, policy: &SummaryPolicy) {
        if let Some(config) = result.chart_config {
            self.set_chart(config);
        }
        if let Some(summary) = result.summary_text {
            if policy.accepts(&summary) {
                self.current_summary = Some(summary);
            } else {
                debug!("summary rejected by policy");
            }
        }
    }

    /// The finished, non-empty messages in wire form.
    pub fn history(&self) -> Vec<ChatHistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !m.streaming && !m.content.trim().is_empty())
            .map(ChatHistoryEntry::from)
            .collect()
    }

    /// Starts a new top-level conversation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
