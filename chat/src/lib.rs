//! Minimal OpenAI-compatible chat client.
//!
//! This crate provides a focused client for the `/chat/completions` and
//! `/embeddings` endpoints shared by Groq, OpenAI, Ollama and most other
//! hosted or local model servers:
//! - Non-streaming chat completions
//! - Batch text embeddings
//! - Bounded request timeouts so a hung server cannot stall a caller forever

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur when using the chat client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Chat completions client.
#[derive(Clone)]
pub struct Chat {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl Chat {
    /// Create a new client for the default endpoint with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            client: build_http_client(timeout)?,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: Some(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            timeout,
        })
    }

    /// Create a client for a server that needs no credentials (e.g. a local Ollama).
    pub fn anonymous(api_base: impl Into<String>) -> Result<Self, Error> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            client: build_http_client(timeout)?,
            api_base: trim_base(api_base.into()),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout,
        })
    }

    /// Create a client from the environment.
    ///
    /// Reads `LLM_API_KEY` (falling back to `GROQ_API_KEY`), `LLM_API_BASE`,
    /// `LLM_MODEL` and `LLM_TIMEOUT_SECS`. A key is only mandatory when the
    /// default hosted endpoint is used.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("GROQ_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        let api_base = std::env::var("LLM_API_BASE").ok().filter(|b| !b.is_empty());

        let mut chat = match (api_key, api_base) {
            (Some(key), Some(base)) => Self::new(key)?.with_api_base(base),
            (Some(key), None) => Self::new(key)?,
            (None, Some(base)) => Self::anonymous(base)?,
            (None, None) => return Err(Error::NoApiKey),
        };

        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                chat = chat.with_model(model);
            }
        }
        if let Ok(secs) = std::env::var("LLM_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::Config(format!("LLM_TIMEOUT_SECS: {e}")))?;
            chat = chat.with_timeout(Duration::from_secs(secs))?;
        }
        Ok(chat)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different OpenAI-compatible server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = trim_base(api_base.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, Error> {
        self.client = build_http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request);
        debug!(
            model = %api_request.model,
            messages = api_request.messages.len(),
            "chat completion"
        );

        let api_response: ApiResponse = self.post_json("chat/completions", &api_request).await?;
        Ok(parse_response(api_response))
    }

    /// Embed a batch of texts, returning one vector per input in input order.
    pub async fn embed(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, Error> {
        let api_request = ApiEmbeddingRequest {
            model: model.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
        };
        debug!(model, inputs = inputs.len(), "embedding request");

        let mut api_response: ApiEmbeddingResponse =
            self.post_json("embeddings", &api_request).await?;

        if api_response.data.len() != inputs.len() {
            return Err(Error::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                api_response.data.len()
            )));
        }

        api_response.data.sort_by_key(|d| d.index);
        Ok(api_response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/{path}", self.api_base))
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Network(e.to_string())
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| ApiMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));

        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: request.max_tokens,
            messages,
            temperature: request.temperature,
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

fn parse_response(api_response: ApiResponse) -> Response {
    let choice = api_response.choices.into_iter().next();
    let (content, finish_reason) = match choice {
        Some(c) => (
            c.message.content.unwrap_or_default(),
            c.finish_reason.as_deref().map(FinishReason::from_api),
        ),
        None => (String::new(), None),
    };

    Response {
        id: api_response.id,
        model: api_response.model,
        content,
        finish_reason: finish_reason.unwrap_or(FinishReason::Stop),
        usage: api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub max_tokens: Option<usize>,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: None,
            system: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl Response {
    /// The generated text.
    pub fn text(&self) -> &str {
        &self.content
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

impl FinishReason {
    fn from_api(reason: &str) -> Self {
        match reason {
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ApiEmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingResponse {
    data: Vec<ApiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
