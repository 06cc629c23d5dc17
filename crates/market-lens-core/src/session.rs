//! One user turn, end to end: question → answer (one-shot or streamed) →
//! extraction → web-search enrichment.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::MarketClient;
use crate::config::Config;
use crate::conversation::{ChatHistoryEntry, Conversation};
use crate::error::{Error, Result};
use crate::extract::{extract_strict, ExtractionResult, SummaryPolicy};
use crate::locale::Locale;
use crate::selection::SelectionEvent;
use crate::stream::{AssemblyEffect, StreamAssembler, StreamEvent};

/// What a successful turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Id of the assistant message holding the answer.
    pub message_id: String,
    pub extraction: ExtractionResult,
    /// Web-search text for a streamed answer, when the backend had one. Any
    /// summary or chart in it has already been applied to the conversation.
    pub enrichment: Option<String>,
}

pub struct Session {
    client: MarketClient,
    conversation: Conversation,
    locale: Locale,
    policy: SummaryPolicy,
    enrich: bool,
}

impl Session {
    pub fn new(client: MarketClient, config: &Config) -> Self {
        Self {
            client,
            conversation: Conversation::new(),
            locale: config.locale,
            policy: config.summary_policy.clone(),
            enrich: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(MarketClient::new(config), config)
    }

    /// Turns web-search enrichment after streamed answers on or off.
    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    pub fn client(&self) -> &MarketClient {
        &self.client
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn set_locale(&mut self, locale: Locale) {
        info!(locale = %locale, "locale changed");
        self.locale = locale;
    }

    /// Starts a new top-level conversation, selection included.
    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    /// Feeds the guided selection. Returns the analysis question once the
    /// region is chosen; pass it to [`Session::ask`] or
    /// [`Session::ask_streaming`].
    pub fn select(&mut self, event: SelectionEvent) -> Result<Option<String>> {
        self.conversation.selection.apply(event, self.locale)
    }

    /// Asks a question and waits for the complete answer.
    pub async fn ask(&mut self, question: &str) -> Result<TurnOutcome> {
        let history = self.begin_turn(question);
        match self.one_shot(question, &history).await {
            Ok(outcome) => {
                self.conversation.loading = false;
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Asks a question and assembles the streamed answer. `on_update` sees
    /// every event right after it has been applied to the conversation.
    pub async fn ask_streaming<F>(
        &mut self,
        question: &str,
        cancel: &CancellationToken,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&StreamEvent, AssemblyEffect),
    {
        let history = self.begin_turn(question);
        match self.streamed(question, &history, cancel, on_update).await {
            Ok(outcome) => {
                self.conversation.loading = false;
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn begin_turn(&mut self, question: &str) -> Vec<ChatHistoryEntry> {
        let history = self.conversation.history();
        self.conversation.push_user(question);
        self.conversation.loading = true;
        info!(history = history.len(), "turn started");
        history
    }

    async fn one_shot(&mut self, question: &str, history: &[ChatHistoryEntry]) -> Result<TurnOutcome> {
        let accepted = self.client.submit_question(question, history).await?;
        let answer = self.client.get_answer(&accepted.message_id).await?;

        let message_id = self.conversation.push_assistant(
            Some(answer.message_id.clone()),
            answer.answer.clone(),
            answer.timestamp(),
        );
        let extraction = self.absorb(&answer.answer);
        info!(message_id = %message_id, "answer received");

        Ok(TurnOutcome {
            message_id,
            extraction,
            enrichment: None,
        })
    }

    async fn streamed<F>(
        &mut self,
        question: &str,
        history: &[ChatHistoryEntry],
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&StreamEvent, AssemblyEffect),
    {
        let accepted = self.client.submit_question(question, history).await?;
        let message_id = self
            .conversation
            .begin_assistant(Some(accepted.message_id.clone()));
        let mut assembler = StreamAssembler::new(&message_id, self.locale);

        let conversation = &mut self.conversation;
        let streamed = self
            .client
            .stream_answer(&accepted.message_id, cancel, |event| {
                let effect = assembler.apply(conversation, event.clone())?;
                on_update(&event, effect);
                Ok(())
            })
            .await;
        assembler.finish(&mut self.conversation)?;
        streamed?;

        let content = self
            .conversation
            .message(&message_id)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let extraction = self.absorb(&content);
        info!(message_id = %message_id, length = content.len(), "stream complete");

        let enrichment = if self.enrich {
            self.enrichment(&content, cancel).await?
        } else {
            None
        };
        if let Some(text) = &enrichment {
            // A summary in the search text replaces the answer's own.
            self.absorb(text);
        }

        Ok(TurnOutcome {
            message_id,
            extraction,
            enrichment,
        })
    }

    /// Enrichment is best effort: only cancellation is reported.
    async fn enrichment(&self, content: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        match self.client.web_search(content, cancel).await {
            Ok(text) => Ok(text),
            Err(e @ Error::Cancelled { .. }) => Err(e),
            Err(e) => {
                warn!("web search enrichment failed: {}", e);
                Ok(None)
            }
        }
    }

    fn absorb(&mut self, content: &str) -> ExtractionResult {
        let extraction = extract_strict(content);
        self.conversation
            .apply_extraction(extraction.clone(), &self.policy);
        extraction
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!("turn failed: {}", error);
        self.conversation
            .push_assistant(None, self.locale.apology(), None);
        self.conversation.loading = false;
        error
    }
}
