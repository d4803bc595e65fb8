//! Opening the streamed answer request against the workshop server.

use crate::protocol::ByteStream;
use crate::session::Persona;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;

/// Body of the `/api/ask` request.
///
/// `database` selects the persona's knowledge base; the remaining knobs pass
/// through to the server's answer pipeline unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    pub question: String,
    pub database: Persona,
    pub provider: String,
    pub model: String,
    pub enhanced_mode: bool,
    pub answer_length: String,
    pub quote_count: u32,
}

impl AskRequest {
    /// Request with the server's defaults for everything but the question and
    /// persona.
    pub fn new(question: impl Into<String>, persona: Persona) -> Self {
        Self {
            question: question.into(),
            database: persona,
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            enhanced_mode: false,
            answer_length: "medium".to_string(),
            quote_count: 3,
        }
    }
}

/// Opens the streaming answer body for a submitted question.
///
/// Abstracted so exchanges can be driven by scripted byte streams in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream>;
}

/// `StreamOpener` that POSTs to the workshop server's `/api/ask` endpoint and
/// hands back the raw response body.
pub struct HttpStreamOpener {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamOpener {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StreamOpener for HttpStreamOpener {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream> {
        let url = format!("{}/api/ask", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("ask request failed to send")?
            .error_for_status()
            .context("ask request rejected")?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_request_serializes_with_server_field_names() {
        let request = AskRequest::new("What is the shadow?", Persona::Jung);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["question"], "What is the shadow?");
        assert_eq!(value["database"], "jung");
        assert_eq!(value["provider"], "openai");
        assert_eq!(value["enhanced_mode"], false);
        assert_eq!(value["answer_length"], "medium");
        assert_eq!(value["quote_count"], 3);
    }
}
