use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::traits::{ChatModel, Message, MessageRole};
use crate::types::{ChatRequest, ChatResponse, ResponseFormat, WireMessage};

/// Client for any OpenAI-compatible chat endpoint (OpenAI, Groq,
/// OpenRouter, local inference servers).
pub struct OpenAiCompatClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat API error ({}): {}", status, error_text));
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("empty chat response"))
    }

    fn wire_messages(messages: Vec<Message>) -> Vec<WireMessage> {
        messages
            .into_iter()
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: m.content,
            })
            .collect()
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        self.chat(&ChatRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(messages),
            temperature: None,
            response_format: None,
        })
        .await
    }

    async fn complete_json(&self, messages: Vec<Message>) -> Result<String> {
        self.chat(&ChatRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(messages),
            temperature: Some(0.2),
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
        })
        .await
    }
}
