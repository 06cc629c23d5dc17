//! HTTP client for the market-research backend.

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::conversation::ChatHistoryEntry;
use crate::error::{Error, Result};
use crate::stream::{EventDecoder, StreamEvent};

#[derive(Serialize)]
struct QuestionRequest<'a> {
    message: &'a str,
    conversation_history: &'a [ChatHistoryEntry],
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    message_id: &'a str,
}

#[derive(Serialize)]
struct WebSearchRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionResponse {
    pub message_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerResponse {
    pub message_id: String,
    pub answer: String,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl AnswerResponse {
    /// The backend sends ISO-8601, with or without an offset; naive values
    /// are taken as UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[derive(Deserialize)]
struct WebSearchResponse {
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Deserialize)]
struct CategoriesResponse {
    categories: Vec<String>,
}

#[derive(Deserialize)]
struct SubcategoriesResponse {
    subcategories: Vec<String>,
}

#[derive(Deserialize)]
struct RegionsResponse {
    regions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub service: String,
}

#[derive(Clone)]
pub struct MarketClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl MarketClient {
    pub fn new(config: &Config) -> Self {
        Self::with_timeouts(
            config.base_url(),
            config.request_timeout(),
            config.stream_idle_timeout(),
        )
    }

    pub fn with_timeouts(base_url: &str, request_timeout: Duration, stream_idle_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            stream_idle_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit_question(
        &self,
        message: &str,
        history: &[ChatHistoryEntry],
    ) -> Result<QuestionResponse> {
        let request = self.client.post(self.url("/chat/question")).json(&QuestionRequest {
            message,
            conversation_history: history,
        });
        let response: QuestionResponse = self.send_json("submit question", request).await?;
        info!(message_id = %response.message_id, "question accepted");
        Ok(response)
    }

    pub async fn get_answer(&self, message_id: &str) -> Result<AnswerResponse> {
        let request = self
            .client
            .post(self.url("/chat/answer"))
            .json(&AnswerRequest { message_id });
        self.send_json("get answer", request).await
    }

    /// Reads the streamed answer, handing every decoded event to `on_event`
    /// in order. Ends when the server closes the connection.
    pub async fn stream_answer<F>(
        &self,
        message_id: &str,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<()>
    where
        F: FnMut(StreamEvent) -> Result<()>,
    {
        const CONTEXT: &str = "answer stream";

        let request = self
            .client
            .post(self.url("/chat/answer/stream"))
            .json(&AnswerRequest { message_id });
        let send = self.deadline(CONTEXT, async move { Ok::<_, Error>(request.send().await?) });
        let response = self.cancellable(CONTEXT, cancel, send).await?;
        let response = check_status(CONTEXT, response).await?;

        let mut body = response.bytes_stream();
        let mut decoder = EventDecoder::new();
        let idle = self.stream_idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(message_id, "stream cancelled");
                    return Err(Error::Cancelled { context: CONTEXT });
                }
                next = tokio::time::timeout(idle, body.next()) => next,
            };

            match next {
                Err(_) => {
                    return Err(Error::Timeout {
                        context: CONTEXT,
                        seconds: idle.as_secs(),
                    })
                }
                Ok(None) => break,
                Ok(Some(chunk)) => {
                    for event in decoder.feed(&chunk?) {
                        on_event(event)?;
                    }
                }
            }
        }

        if let Some(event) = decoder.finish() {
            on_event(event)?;
        }
        debug!(message_id, "stream closed");
        Ok(())
    }

    /// Returns the search summary, or `None` when the backend has nothing.
    pub async fn web_search(&self, input: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        const CONTEXT: &str = "web search";

        let request = self
            .client
            .post(self.url("/chat/web-search"))
            .json(&WebSearchRequest { input });
        let response: WebSearchResponse = self
            .cancellable(CONTEXT, cancel, self.send_json(CONTEXT, request))
            .await?;
        Ok(response.output_text.filter(|t| !t.trim().is_empty()))
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        let request = self.client.get(self.url("/chat/data/categories"));
        let response: CategoriesResponse = self.send_json("list categories", request).await?;
        Ok(response.categories)
    }

    pub async fn subcategories(&self, category: Option<&str>) -> Result<Vec<String>> {
        let mut request = self.client.get(self.url("/chat/data/subcategories"));
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }
        let response: SubcategoriesResponse = self.send_json("list subcategories", request).await?;
        Ok(response.subcategories)
    }

    pub async fn regions(&self) -> Result<Vec<String>> {
        let request = self.client.get(self.url("/chat/data/regions"));
        let response: RegionsResponse = self.send_json("list regions", request).await?;
        Ok(response.regions)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let request = self.client.get(self.url("/chat/health"));
        self.send_json("health check", request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, context: &'static str, request: RequestBuilder) -> Result<T> {
        self.deadline(context, async move {
            let response = check_status(context, request.send().await?).await?;
            Ok::<T, Error>(response.json::<T>().await?)
        })
        .await
    }

    async fn deadline<T>(&self, context: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(out) => out,
            Err(_) => Err(Error::Timeout {
                context,
                seconds: self.request_timeout.as_secs(),
            }),
        }
    }

    async fn cancellable<T>(
        &self,
        context: &'static str,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { context }),
            out = fut => out,
        }
    }
}

async fn check_status(context: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http {
            context,
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
