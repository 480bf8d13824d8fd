//! # Chat-Completion Collaborator Client
//!
//! Thin client for the external chat-completion API (Ollama-style
//! `/api/chat`). The summary and talk endpoints are request/response glue
//! over this client; the language model's behaviour is entirely the
//! collaborator's concern.
//!
//! ## Collaborator Contract:
//! - Request: JSON with a model id, an ordered list of role-tagged
//!   messages, an optional `format` structured-output schema, and
//!   `"stream": false`
//! - Response: generated text under `message.content`
//! - Errors: non-200 responses and transport failures surface to the
//!   caller as a plain error string (`Error: <status>` /
//!   `Exception: <detail>`), never as a panic past the request boundary

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One role-tagged chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Wire format of a chat request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Client for one chat-completion endpoint and model.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_url: String, model: String, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            api_url,
            model,
        })
    }

    /// Send one non-streaming chat request and return the generated text.
    ///
    /// `format`, when present, is passed through as the structured-output
    /// schema; the collaborator then returns JSON matching it as the
    /// message content.
    pub async fn chat(&self, messages: &[ChatMessage], format: Option<&Value>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            format,
            stream: false,
        };

        let response = self
            .http
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Exception: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Error: {}", response.status().as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Exception: {}", e))?;

        Ok(body
            .message
            .map(|m| m.content)
            .unwrap_or_else(|| "No response from model".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_without_format() {
        let messages = vec![
            ChatMessage::system("You are a note-taking assistant."),
            ChatMessage::user("hello"),
        ];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            format: None,
            stream: false,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        // The format key must be absent, not null.
        assert!(json.get("format").is_none());
    }

    #[test]
    fn test_request_serialization_with_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        });
        let messages = vec![ChatMessage::user("summarize this")];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            format: Some(&schema),
            stream: false,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["format"]["type"], "object");
        assert_eq!(json["format"]["required"][0], "summary");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"llama3.2","message":{"role":"assistant","content":"hi there"}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.unwrap().content, "hi there");
    }

    #[test]
    fn test_missing_message_yields_placeholder() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"done": true}"#).unwrap();
        let content = parsed
            .message
            .map(|m| m.content)
            .unwrap_or_else(|| "No response from model".to_string());
        assert_eq!(content, "No response from model");
    }
}
