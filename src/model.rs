//! Conversation data model: conversations, items, messages and turn events.
//!
//! A [`Conversation`] is an append-only sequence of [`Item`]s. Insertion
//! order is chronological order; nothing is ever reordered or edited in
//! place once persisted, with the single exception of a streaming
//! [`Message`] that is mutated while `partial` and frozen when the stream
//! terminates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use uuid::Uuid;

/// Identifier for a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier for a [`ToolCall`], referenced by its matching [`ToolOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallId(pub String);

impl ToolCallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ToolCallId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ToolCallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of a [`Message`] author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content part inside a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ImageRef { uri: String, mime_type: String },
    AudioRef { uri: String, mime_type: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Text content of this part, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A conversation message with a role and ordered content parts.
///
/// While a provider stream is in flight the assistant message being built
/// has `partial == true` and its last text part grows in place; it is
/// frozen before being appended to the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub partial: bool,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts,
            partial: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Append a text delta, extending the trailing text part when present.
    pub fn push_text(&mut self, delta: &str) {
        if let Some(Part::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(Part::text(delta));
        }
    }

    /// Freeze a streaming message once its stream has terminated.
    pub fn freeze(&mut self) {
        self.partial = false;
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome payload of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { value: Value },
    Error { message: String },
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }
}

/// The recorded output of a [`ToolCall`], keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: ToolCallId,
    pub name: String,
    pub result: ToolResult,
}

impl ToolOutput {
    pub fn success(call: &ToolCall, value: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            result: ToolResult::Success { value },
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            result: ToolResult::Error {
                message: message.into(),
            },
        }
    }
}

/// Direction of an [`AudioEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioDirection {
    Input,
    Output,
}

/// A voice turn recorded alongside the text transcript.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub id: Uuid,
    pub direction: AudioDirection,
    pub transcript: Option<String>,
    pub audio_uri: Option<String>,
}

impl AudioEvent {
    pub fn new(direction: AudioDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            transcript: None,
            audio_uri: None,
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }
}

/// Atomic unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message(Message),
    ToolCall(ToolCall),
    ToolOutput(ToolOutput),
    AudioEvent(AudioEvent),
}

impl Item {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Item::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Item::ToolCall(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tool_output(&self) -> Option<&ToolOutput> {
        match self {
            Item::ToolOutput(o) => Some(o),
            _ => None,
        }
    }
}

/// User-supplied conversation metadata.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// An ordered, append-only conversation owned by a single session at a time.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub items: Vec<Item>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Compressed representation of items evicted from the context window.
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(metadata: Metadata) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            items: Vec::new(),
            metadata,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an item, bumping `updated_at`. Items are never removed.
    pub fn push(&mut self, item: Item) {
        self.items.push(item);
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Tool calls that have no matching output yet.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        let resolved: Vec<&ToolCallId> = self
            .items
            .iter()
            .filter_map(Item::as_tool_output)
            .map(|o| &o.call_id)
            .collect();
        self.items
            .iter()
            .filter_map(Item::as_tool_call)
            .filter(|c| !resolved.contains(&&c.id))
            .collect()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(Metadata::default())
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    OutputTokens,
    ContentFilter,
    ToolCalls,
}

/// Token usage reported by a provider, accumulated across tool rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        fn sum(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage {
            prompt_tokens: sum(self.prompt_tokens, rhs.prompt_tokens),
            completion_tokens: sum(self.completion_tokens, rhs.completion_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Events emitted on the per-turn stream, in the order they occur.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Incremental assistant text, in provider emission order.
    TextDelta(String),
    /// A new item was staged for the conversation.
    ItemAdded(Item),
    ToolCallStarted(ToolCall),
    ToolCallFinished(ToolOutput),
    /// An MCP tool call is waiting on user approval.
    ApprovalRequested(ToolCall),
    /// A requested tool has no registered executor.
    UnhandledToolCall(ToolCall),
    Usage(Usage),
    /// The finalized assistant message closing the turn.
    TurnCompleted(Message),
}
