//! Provider service adapter contracts and error taxonomy.
//!
//! The core never talks HTTP itself; it hands an assembled
//! [`RequestPayload`] to a [`ChatProvider`] and consumes either a complete
//! [`ProviderTurn`] or an ordered stream of [`Token`]s. Transcription and
//! synthesis follow the same shape for the audio sub-controller.

use async_trait::async_trait;
use futures::stream::BoxStream;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{FinishReason, Item, Part, ToolCall, Usage};
use crate::options::ToolChoice;

/// Errors reported by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed")]
    Auth,

    #[error("rate limited{}", .retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider call timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether a retry with backoff is worth attempting. Auth and request
    /// errors are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable(_)
                | ProviderError::Timeout
        )
    }
}

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Build a spec from a schemars-derived schema.
    pub fn from_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: RootSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::to_value(schema).unwrap_or(Value::Null),
        }
    }
}

/// The exact payload sent to a provider for one call.
///
/// Produced only by the context assembler; adapters translate it to their
/// wire format but never reorder or drop its items.
#[derive(Debug, Clone, Default)]
pub struct RequestPayload {
    pub instructions: Option<String>,
    /// Memory summary standing in for evicted history.
    pub summary: Option<String>,
    pub items: Vec<Item>,
    pub tools: Vec<ToolSpec>,
    /// Constraint on which tool, if any, the model must call.
    pub tool_choice: ToolChoice,
}

/// A complete (non-streaming) provider response for one call.
#[derive(Debug, Clone, Default)]
pub struct ProviderTurn {
    /// Assistant content parts, in emission order.
    pub parts: Vec<Part>,
    /// Tool invocations requested by the model, in request order.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish: Option<FinishReason>,
}

impl ProviderTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One element of a provider token stream, in provider emission order.
#[derive(Debug, Clone)]
pub enum Token {
    Text(String),
    /// A complete tool call surfaced by the stream. Adapters are
    /// responsible for coalescing argument fragments into one call.
    ToolCall(ToolCall),
    Usage(Usage),
    Finish(FinishReason),
}

/// Chat capability of a provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn send(&self, payload: RequestPayload) -> Result<ProviderTurn, ProviderError>;

    /// Whether tool outputs must be resubmitted in the order the provider
    /// requested the calls. Provider-specific; defaults to the strict
    /// interpretation.
    fn ordered_tool_results(&self) -> bool {
        true
    }

    /// Whether the provider accepts multiple tool calls in one response.
    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }
}

/// Streaming extension of [`ChatProvider`].
#[async_trait]
pub trait StreamingChatProvider: ChatProvider {
    /// Send a request and stream tokens as the provider emits them.
    async fn stream(
        &self,
        payload: RequestPayload,
    ) -> Result<BoxStream<'static, Result<Token, ProviderError>>, ProviderError>;
}

/// Speech-to-text capability.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: Option<&str>,
    ) -> Result<String, ProviderError>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// OAuth access-token source for adapters that need delegated credentials
/// (MCP servers in particular). Implementations handle caching and refresh
/// internally.
#[async_trait]
pub trait OAuthTokenProvider: Send + Sync {
    async fn access_token(&self, service: &str, scopes: &[&str])
        -> Result<String, ProviderError>;
}
