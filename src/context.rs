//! Context assembly: turning stored history plus pending input into the
//! exact request payload for one provider call.
//!
//! The assembled window is a derived view, recomputed per request and
//! never persisted. Instructions, the memory summary and the pending input
//! are never dropped; history fills whatever budget remains, newest items
//! first, with evicted items optionally folded into the summary.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::{Conversation, Item, Message, ToolResult};
use crate::options::{ContextOptions, ToolChoice};
use crate::provider::{ChatProvider, RequestPayload, ToolSpec};

#[derive(Debug, Error)]
pub enum ContextError {
    /// Even the non-droppable portion (instructions, summary, pending
    /// input) exceeds the budget; the caller must shorten its input.
    #[error("context overflow: non-droppable content needs {needed} tokens, budget is {budget}")]
    Overflow { needed: usize, budget: usize },
}

/// Rough token estimate: one token per four characters, rounded up. Good
/// enough for budget enforcement; adapters needing exact counts can
/// re-validate on send.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn item_tokens(item: &Item) -> usize {
    match item {
        Item::Message(msg) => estimate_tokens(&msg.text()),
        Item::ToolCall(call) => {
            estimate_tokens(&call.name) + estimate_tokens(&call.arguments.to_string())
        }
        Item::ToolOutput(output) => {
            let payload = match &output.result {
                ToolResult::Success { value } => value.to_string(),
                ToolResult::Error { message } => message.clone(),
            };
            estimate_tokens(&output.name) + estimate_tokens(&payload)
        }
        Item::AudioEvent(event) => event
            .transcript
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0),
    }
}

/// Result of context assembly: the payload to send plus the items that
/// did not fit and are candidates for summarization.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub payload: RequestPayload,
    /// Oldest-first items excluded from the window.
    pub dropped: Vec<Item>,
}

/// Produces memory summaries from evicted history. The provided
/// implementation delegates to any chat provider; tests plug in fakes.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `dropped` items into `previous`, returning the new summary.
    async fn summarize(
        &self,
        previous: Option<&str>,
        dropped: &[Item],
    ) -> Result<String, crate::provider::ProviderError>;
}

/// [`Summarizer`] backed by a chat provider: evicted history is rendered
/// as a transcript and condensed by the model itself.
pub struct ProviderSummarizer<P: ChatProvider> {
    provider: Arc<P>,
    instructions: String,
}

impl<P: ChatProvider> ProviderSummarizer<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            instructions: "Condense the following conversation excerpt into a short \
                           summary that preserves facts, decisions and open tasks. \
                           Merge it with the prior summary when one is given."
                .to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    fn render(previous: Option<&str>, dropped: &[Item]) -> String {
        let mut text = String::new();
        if let Some(previous) = previous {
            text.push_str("Prior summary:\n");
            text.push_str(previous);
            text.push_str("\n\n");
        }
        text.push_str("Excerpt:\n");
        for item in dropped {
            match item {
                Item::Message(msg) => {
                    text.push_str(&format!("{:?}: {}\n", msg.role, msg.text()));
                }
                Item::ToolCall(call) => {
                    text.push_str(&format!("[tool call] {}({})\n", call.name, call.arguments));
                }
                Item::ToolOutput(output) => {
                    let payload = match &output.result {
                        ToolResult::Success { value } => value.to_string(),
                        ToolResult::Error { message } => format!("error: {message}"),
                    };
                    text.push_str(&format!("[tool result] {}: {payload}\n", output.name));
                }
                Item::AudioEvent(event) => {
                    if let Some(transcript) = &event.transcript {
                        text.push_str(&format!("[voice] {transcript}\n"));
                    }
                }
            }
        }
        text
    }
}

#[async_trait]
impl<P: ChatProvider> Summarizer for ProviderSummarizer<P> {
    async fn summarize(
        &self,
        previous: Option<&str>,
        dropped: &[Item],
    ) -> Result<String, crate::provider::ProviderError> {
        let payload = RequestPayload {
            instructions: Some(self.instructions.clone()),
            summary: None,
            items: vec![Item::Message(Message::user(Self::render(previous, dropped)))],
            ..Default::default()
        };
        let turn = self.provider.send(payload).await?;
        Ok(turn
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// Assemble the request payload for one provider call.
///
/// Fixed order: instructions, summary, retained history suffix, pending
/// input. Pending input and instructions are charged against the budget
/// first and never dropped.
pub fn assemble(
    conversation: &Conversation,
    pending: &[Item],
    instructions: Option<&str>,
    tools: Vec<ToolSpec>,
    options: &ContextOptions,
) -> Result<AssembledContext, ContextError> {
    let budget = options
        .max_context_tokens
        .saturating_sub(options.response_reserve);

    let fixed_cost = instructions.map(estimate_tokens).unwrap_or(0)
        + conversation
            .summary
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0)
        + pending.iter().map(item_tokens).sum::<usize>();

    if fixed_cost > budget {
        return Err(ContextError::Overflow {
            needed: fixed_cost,
            budget,
        });
    }

    // Fill the remaining budget with the newest history first. The
    // message-count threshold caps the retained suffix independently of
    // the token budget.
    let mut remaining = budget - fixed_cost;
    let mut retained_rev: Vec<&Item> = Vec::new();
    for item in conversation.items.iter().rev() {
        if retained_rev.len() >= options.max_context_messages {
            break;
        }
        let cost = item_tokens(item);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        retained_rev.push(item);
    }

    let retained_count = retained_rev.len();
    let dropped: Vec<Item> = conversation.items[..conversation.items.len() - retained_count]
        .iter()
        .cloned()
        .collect();

    let mut items: Vec<Item> = retained_rev.into_iter().rev().cloned().collect();
    items.extend(pending.iter().cloned());

    debug!(
        "Assembled context: {} retained, {} dropped, ~{} tokens spare",
        retained_count,
        dropped.len(),
        remaining
    );

    Ok(AssembledContext {
        payload: RequestPayload {
            instructions: instructions.map(str::to_string),
            summary: conversation.summary.clone(),
            items,
            tools,
            tool_choice: ToolChoice::default(),
        },
        dropped,
    })
}

/// Whether assembly should fold dropped items into the memory summary.
pub fn should_summarize(
    conversation: &Conversation,
    dropped: &[Item],
    options: &ContextOptions,
) -> bool {
    options.summarize && !dropped.is_empty() && conversation.len() > options.max_context_messages
}
