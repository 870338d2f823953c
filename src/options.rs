//! Immutable configuration value objects for sessions and transports.
//!
//! All of these are plain data constructed once at startup and handed to
//! the session controller; the core never reads configuration from any
//! ambient store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Policy applied when the model requests a tool with no registered executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledToolPolicy {
    /// Surface the call on the turn event stream and resolve it with an
    /// error output after the tool timeout if nothing handles it.
    RaiseEvent,
    /// Synthesize an error tool output immediately.
    #[default]
    AutoReject,
}

/// When the store's save hook runs relative to turn finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistencePolicy {
    /// Save after every finalized turn.
    Immediate,
    /// Save at most once per interval; the session's `flush` saves
    /// unconditionally.
    Debounced(Duration),
    /// Only save on explicit `flush`.
    Manual,
}

/// Constraint on which tool, if any, the model must call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    /// The named tool must be called. The name must be registered; an
    /// unknown name is rejected before any provider call.
    Required(String),
}

/// Retry policy for idempotent provider calls.
///
/// Tool execution is never retried automatically; tool side effects are
/// not assumed idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts per provider call, including the first.
    pub max_attempts: u32,
    /// Base backoff, doubled after each failed attempt.
    pub backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Context-window budget configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Model context window, in estimated tokens.
    pub max_context_tokens: usize,
    /// Tokens reserved for the response; never filled with history.
    pub response_reserve: usize,
    /// Message-count threshold above which older items are summarized.
    pub max_context_messages: usize,
    /// Fold dropped items into a memory summary instead of discarding them.
    pub summarize: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            response_reserve: 4_096,
            max_context_messages: 64,
            summarize: false,
        }
    }
}

/// Session controller configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// System instructions prepended to every assembled request.
    pub instructions: Option<String>,
    /// Maximum nested tool-call rounds within one turn.
    pub max_tool_depth: usize,
    /// Dispatch multiple tool calls from one response concurrently.
    pub parallel_tool_calls: bool,
    pub tool_timeout: Duration,
    pub provider_timeout: Duration,
    pub approval_timeout: Duration,
    pub retry: RetryOptions,
    pub unhandled_tools: UnhandledToolPolicy,
    pub persistence: PersistencePolicy,
    pub tool_choice: ToolChoice,
    pub context: ContextOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: None,
            max_tool_depth: 10,
            parallel_tool_calls: false,
            tool_timeout: Duration::from_secs(30),
            provider_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(60),
            retry: RetryOptions::default(),
            unhandled_tools: UnhandledToolPolicy::default(),
            persistence: PersistencePolicy::Immediate,
            tool_choice: ToolChoice::Auto,
            context: ContextOptions::default(),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_max_tool_depth(mut self, depth: usize) -> Self {
        self.max_tool_depth = depth;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_unhandled_tools(mut self, policy: UnhandledToolPolicy) -> Self {
        self.unhandled_tools = policy;
        self
    }

    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_context(mut self, context: ContextOptions) -> Self {
        self.context = context;
        self
    }
}

/// HTTP transport configuration for provider adapters.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Request timeout. If None, the client default is used.
    pub timeout: Option<Duration>,
    /// HTTP proxy URL.
    pub proxy: Option<String>,
    /// Additional headers sent with every request.
    pub headers: Option<HashMap<String, String>>,
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy = Some(proxy_url.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}
