//! # genagent - Generative-AI Agent Runtime
//!
//! A provider-agnostic agent runtime: multi-turn conversation
//! orchestration with streaming responses, automatic tool execution and
//! pluggable conversation persistence.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Provider-agnostic adapter traits with a structured error taxonomy
//! - Turn state machine with bounded tool-call rounds, timeouts, retries
//!   and clean cancellation
//! - Token-budgeted context assembly with optional history summarization
//! - Tool registry over local functions, shell commands, hosted tools and
//!   MCP servers (with approval gating)
//! - Conversation stores: in-memory, local file, none, or custom
//!
//! ## Architecture
//!
//! 1. **Provider adapters** implement [`ChatProvider`] (and optionally
//!    [`StreamingChatProvider`]) over a concrete API; [`OpenAiChatAdapter`]
//!    is the bundled reference.
//! 2. **[`ToolRegistry`]** holds tool registrations, each resolved at
//!    registration time to one of a closed set of executor kinds.
//! 3. **[`Session`]** orchestrates turns: it assembles the context window,
//!    calls the provider, resolves tool calls, resubmits outputs and
//!    persists the finalized conversation.
//!
//! ## Example
//! ```no_run
//! use genagent::{OpenAiChatAdapter, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = OpenAiChatAdapter::new("your-api-key", "gpt-4o");
//!     let mut session = Session::new(provider);
//!
//!     let outcome = session.send("Hello!").await?;
//!     println!("{}", outcome.message.text());
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod context;
pub mod http;
pub mod mcp;
pub mod model;
pub mod openai;
pub mod options;
pub mod provider;
pub mod session;
pub mod sse;
pub mod store;
pub mod tools;

pub use audio::AudioController;
pub use context::{
    assemble, estimate_tokens, AssembledContext, ContextError, ProviderSummarizer, Summarizer,
};
pub use mcp::{ApprovalDecision, ApprovalHandler, AutoApprove, AutoDeny, McpError, McpServer};
pub use model::{
    Conversation, ConversationId, Item, Message, Metadata, Part, Role, ToolCall, ToolCallId,
    ToolOutput, ToolResult, TurnEvent, Usage,
};
pub use openai::OpenAiChatAdapter;
pub use options::{
    ContextOptions, HttpOptions, PersistencePolicy, RetryOptions, SessionOptions, ToolChoice,
    UnhandledToolPolicy,
};
pub use provider::{
    ChatProvider, OAuthTokenProvider, ProviderError, ProviderTurn, RequestPayload,
    StreamingChatProvider, SynthesisProvider, Token, ToolSpec, TranscriptionProvider,
};
pub use session::{AgentError, Session, TurnOutcome, TurnState, UnhandledToolHandler};
pub use store::{ConversationStore, FileStore, MemoryStore, NullStore, StoreError};
pub use tools::{Executor, ToolError, ToolRegistration, ToolRegistry};

// Re-export rmcp for convenience
pub use rmcp;
