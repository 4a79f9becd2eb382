//! LLM adapter: the engine's one external collaborator.
//!
//! The route's `call-llm` step needs only a single request/response
//! contract (send the accumulated conversation, get a reply back), so
//! rather than pull in a full agent framework this defines that contract
//! directly as a trait and backs it with a small `reqwest` client: callers
//! depend on `ChatClient`, never on the concrete adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
}

/// Contract for talking to a chat-completion model. Routes depend on this
/// trait, never on a concrete provider, so swapping providers or injecting a
/// fake for tests never touches route logic.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply>;
}

/// Gemini-backed implementation of [`ChatClient`], speaking the
/// `generateContent` REST API over `reqwest`.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model_name: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model_name: config.model_name.clone(),
            temperature: config.temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model_name, self.api_key
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent2,
}

#[derive(Deserialize)]
struct GeminiContent2 {
    parts: Vec<GeminiPart>,
}

#[async_trait]
impl ChatClient for GeminiClient {
    #[tracing::instrument(skip(self, messages), err)]
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        if self.api_key.is_empty() {
            return Err(EngineError::External {
                message: "no LLM API key configured".to_string(),
            });
        }

        let body = GenerateRequest {
            contents: messages
                .iter()
                .map(|m| GeminiContent {
                    role: if m.role == "assistant" {
                        "model".to_string()
                    } else {
                        "user".to_string()
                    },
                    parts: vec![GeminiPart {
                        text: m.content.clone(),
                    }],
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::External {
                message: format!("LLM request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::External {
                message: format!("LLM returned {status}: {text}"),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| EngineError::External {
            message: format!("malformed LLM response: {e}"),
        })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| EngineError::External {
                message: "LLM response had no candidates".to_string(),
            })?;

        Ok(ChatReply { content })
    }
}
