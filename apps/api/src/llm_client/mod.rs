//! LLM client: the single point of entry for all Claude API calls.
//!
//! No other module calls the Anthropic API directly. The orchestrator and the
//! resume pipeline only see the `LanguageModel` trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::conversation::{ChatMessage, PhoneNumber, Role};

pub mod prompts;

use prompts::{
    build_interview_system, build_resume_prompt, format_transcript, JSON_ONLY_SYSTEM,
    NAME_EXTRACTION_PROMPT, RESUME_SYSTEM, SUMMARY_SYSTEM,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on one `call_messages`: every attempt times out, plus the backoff sleeps.
pub const MAX_CALL_DURATION: Duration =
    Duration::from_secs(REQUEST_TIMEOUT.as_secs() * MAX_RETRIES as u64 + 1 + 2);

/// Replies are delivered over SMS, so interview turns stay short.
const CONVERSE_OPTIONS: CallOptions = CallOptions {
    max_tokens: 1024,
    temperature: 0.0,
};
const SUMMARY_OPTIONS: CallOptions = CallOptions {
    max_tokens: 2048,
    temperature: 0.0,
};
const RESUME_OPTIONS: CallOptions = CallOptions {
    max_tokens: 2048,
    temperature: 0.5,
};
const NAME_OPTIONS: CallOptions = CallOptions {
    max_tokens: 128,
    temperature: 0.0,
};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Conversation history is empty")]
    EmptyHistory,
}

#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedName {
    name: String,
}

/// The four model-backed operations the service needs. Each is a pure function of
/// its inputs plus a fixed prompt; no conversational state is kept here.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Next interview turn for the ordered history.
    async fn converse(&self, history: &[ChatMessage]) -> Result<String, LlmError>;

    async fn summarize(&self, history: &[ChatMessage]) -> Result<String, LlmError>;

    async fn generate_resume(
        &self,
        summary: &str,
        phone_number: &PhoneNumber,
    ) -> Result<String, LlmError>;

    async fn extract_name(&self, summary: &str) -> Result<String, LlmError>;
}

/// The single LLM client used by all services.
/// Wraps the Anthropic Messages API with retry logic and structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            api_key,
        })
    }

    /// Single-prompt call, for operations that pack their input into one user turn.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        options: CallOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.call_messages(&[ChatMessage::user(prompt)], system, options)
            .await
    }

    /// Makes a raw call to the Claude API with a full message list.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call_messages(
        &self,
        messages: &[ChatMessage],
        system: &str,
        options: CallOptions,
    ) -> Result<LlmResponse, LlmError> {
        if messages.is_empty() {
            return Err(LlmError::EmptyHistory);
        }

        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system,
            messages: messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<AnthropicError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let llm_response: LlmResponse = response.json().await?;

            debug!(
                "LLM call succeeded: input_tokens={}, output_tokens={}",
                llm_response.usage.input_tokens, llm_response.usage.output_tokens
            );

            return Ok(llm_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Calls the LLM and returns the trimmed text of the first text block.
    pub async fn call_text(
        &self,
        messages: &[ChatMessage],
        system: &str,
        options: CallOptions,
    ) -> Result<String, LlmError> {
        let response = self.call_messages(messages, system, options).await?;
        let text = response.text().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text.to_string())
    }

    /// Convenience method that calls the LLM and deserializes the text response as JSON.
    /// The prompt must instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
        options: CallOptions,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system, options).await?;

        let text = response.text().ok_or(LlmError::EmptyContent)?;

        // Strip markdown code fences if the model wraps JSON in them
        let text = strip_json_fences(text);

        serde_json::from_str(text).map_err(LlmError::Parse)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn converse(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
        let system = build_interview_system(chrono::Utc::now().date_naive());
        let history = merge_consecutive_turns(history);
        self.call_text(&history, &system, CONVERSE_OPTIONS).await
    }

    async fn summarize(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
        let transcript = format_transcript(history);
        self.call_text(
            &[ChatMessage::user(transcript)],
            SUMMARY_SYSTEM,
            SUMMARY_OPTIONS,
        )
        .await
    }

    async fn generate_resume(
        &self,
        summary: &str,
        phone_number: &PhoneNumber,
    ) -> Result<String, LlmError> {
        let prompt = build_resume_prompt(summary, phone_number.as_str());
        self.call_text(&[ChatMessage::user(prompt)], RESUME_SYSTEM, RESUME_OPTIONS)
            .await
    }

    async fn extract_name(&self, summary: &str) -> Result<String, LlmError> {
        let prompt = NAME_EXTRACTION_PROMPT.replace("{summary}", summary);
        let extracted: ExtractedName = self
            .call_json(&prompt, JSON_ONLY_SYSTEM, NAME_OPTIONS)
            .await?;
        let name = extracted.name.trim();
        if name.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(name.to_string())
    }
}

/// The Messages API expects alternating roles and a leading user turn. Stored
/// history can hold back-to-back assistant notices, so adjacent turns with the
/// same role are joined and any leading assistant turns are dropped.
fn merge_consecutive_turns(history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(history.len());
    for message in history
        .iter()
        .skip_while(|m| m.role == Role::Assistant)
    {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => merged.push(message.clone()),
        }
    }
    merged
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
