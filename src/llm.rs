//! LLM client for structured and free-form generation
//!
//! All pipeline stages talk to an OpenAI-compatible chat-completions
//! endpoint. Structured stages parse the model output as JSON; the model is
//! assumed to either conform to the requested shape or fail the call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};

/// A single chat-completion request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// System prompt establishing the stage's role
    pub system: String,

    /// User prompt carrying the stage input
    pub prompt: String,

    /// Sampling temperature for this stage
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature,
        }
    }
}

/// Chat-completion contract used by the workflows
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the raw model text
    async fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// Run a completion and deserialize the model output into `T`.
///
/// The model text may wrap the JSON in prose or a code fence; both are
/// tolerated. A payload that does not deserialize into `T` is an error —
/// there is no schema-violation recovery.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    request: &LlmRequest,
) -> Result<T> {
    let text = client.complete(request).await?;
    let value = extract_json_from_text(&text)?;
    serde_json::from_value(value)
        .map_err(|e| Error::llm(format!("LLM output did not match expected shape: {}", e)))
}

/// Pull the first JSON object out of free-form model text.
///
/// Tries the whole string, then the outermost brace span, then fenced
/// ```json blocks.
pub fn extract_json_from_text(text: &str) -> Result<Value> {
    let trimmed = text.trim().trim_start_matches('\u{feff}');

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    if let Some(start) = trimmed.find("```json") {
        if let Some(len) = trimmed[start + 7..].find("```") {
            let block = &trimmed[start + 7..start + 7 + len];
            if let Ok(value) = serde_json::from_str::<Value>(block) {
                return Ok(value);
            }
        }
    }

    Err(Error::llm("No valid JSON found in LLM output"))
}

/// Client for an OpenAI-compatible chat-completions endpoint
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChatClient {
    /// Create a client from config, reading the API key from the environment
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.llm_api_key_env).map_err(|_| {
            Error::config(format!(
                "Missing LLM API key in environment variable {}",
                config.llm_api_key_env
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            api_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::llm(format!("LLM endpoint returned an error status: {}", e)))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("Unreadable LLM response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::llm("LLM response contained no choices"))
    }
}

/// Scripted client for tests: pops canned responses in order and counts
/// how many completions were requested.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next canned response
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: &LlmRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::llm("No scripted response available"))
    }
}
