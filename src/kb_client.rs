use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::cli::chat::conversation_state::Message;

/// Failures surfaced by the backend API, split the way the UI reports
/// them: transport/decode problems vs. an error the server itself returned.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Server(String),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(default)]
    pub kb_items: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    strict: bool,
    history: &'a [Message],
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    ok: bool,
    answer: Option<String>,
    source: Option<String>,
    error: Option<String>,
}

/// A successful answer from the chat endpoint.
#[derive(Debug)]
pub struct ChatReply {
    pub answer: String,
    pub source: Option<String>,
}

#[derive(Serialize)]
struct KbAddRequest<'a> {
    question: &'a str,
    answer: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct KbAddResponse {
    #[serde(default)]
    ok: bool,
    error: Option<String>,
}

pub struct KbClient {
    base_url: Url,
    client: reqwest::Client,
}

impl KbClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let url = self.base_url.join("/api/health")?;
        let response = self.client.get(url).send().await?;
        let health: HealthResponse = response.json().await?;
        debug!(
            "health response: ok={} kb_items={}",
            health.ok, health.kb_items
        );
        Ok(health)
    }

    pub async fn chat(
        &self,
        message: &str,
        strict: bool,
        history: &[Message],
    ) -> Result<ChatReply, ApiError> {
        let url = self.base_url.join("/api/chat")?;
        let body = ChatRequest {
            message,
            strict,
            history,
        };
        debug!(
            "chat request: {}",
            serde_json::json!({ "strict": strict, "history_len": history.len() })
        );

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        let data: ChatResponse = match response.json().await {
            Ok(data) => data,
            Err(e) if !status.is_success() => {
                // Unparseable error body, fall back to the status line.
                error!("chat request failed with status {status}: {e}");
                return Err(ApiError::Server(
                    status.canonical_reason().unwrap_or("unknown").to_string(),
                ));
            }
            Err(e) => return Err(ApiError::Http(e)),
        };

        if !status.is_success() || !data.ok {
            let reason = data.error.unwrap_or_else(|| {
                if status.is_success() {
                    "unknown error".to_string()
                } else {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                }
            });
            error!("chat request rejected: {reason}");
            return Err(ApiError::Server(reason));
        }

        Ok(ChatReply {
            answer: data.answer.unwrap_or_default(),
            source: data.source,
        })
    }

    pub async fn add_to_kb(&self, question: &str, answer: &str) -> Result<(), ApiError> {
        let url = self.base_url.join("/api/kb/add")?;
        let response = self
            .client
            .post(url)
            .json(&KbAddRequest { question, answer })
            .send()
            .await?;
        let status = response.status();
        // A body that fails to parse counts as a rejection, same as ok:false.
        let data: KbAddResponse = response.json().await.unwrap_or_default();

        if !status.is_success() || !data.ok {
            let reason = data.error.unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("unknown").to_string()
            });
            error!("kb add rejected: {reason}");
            return Err(ApiError::Server(reason));
        }
        Ok(())
    }
}
