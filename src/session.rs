//! Session controller: the turn state machine.
//!
//! One session owns at most one active conversation and processes one
//! logical turn at a time as a sequential async pipeline: assemble
//! context, call the provider, resolve any tool calls, resubmit outputs,
//! finalize. All items produced during a turn are staged in a buffer, and
//! a freshly computed memory summary is staged with them; both are
//! committed to the conversation only when the turn finalizes, so
//! cancellation or failure leaves the conversation exactly as it was
//! before the turn started.

use async_trait::async_trait;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioController;
use crate::context::{assemble, should_summarize, ContextError, Summarizer};
use crate::mcp::{await_approval, ApprovalDecision, ApprovalHandler};
use crate::model::{
    Conversation, ConversationId, Item, Message, Metadata, Role, ToolCall, ToolOutput, ToolResult,
    TurnEvent, Usage,
};
use crate::options::{PersistencePolicy, SessionOptions, ToolChoice, UnhandledToolPolicy};
use crate::provider::{
    ChatProvider, ProviderError, ProviderTurn, RequestPayload, StreamingChatProvider, Token,
};
use crate::store::{ConversationStore, MemoryStore, StoreError};
use crate::tools::ToolRegistry;

/// Errors surfaced to the session caller.
///
/// Tool execution failures never appear here; they are absorbed into
/// error tool outputs. Approval denial is likewise a normal negative
/// outcome, not an error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("max tool-call depth ({0}) exceeded")]
    MaxDepthExceeded(usize),
}

/// Observable turn state.
///
/// `Failed` is entered on unrecoverable provider errors and depth
/// exhaustion; validation and context-overflow errors fail fast with no
/// side effects and return the session to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Dispatched,
    AwaitingProviderResponse,
    StreamingPartial,
    ToolCallPending,
    AwaitingApproval,
    ExecutingTools,
    AwaitingToolResubmission,
    Finalizing,
    Cancelled,
    Failed,
}

/// Result of a finalized turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The finalized assistant message.
    pub message: Message,
    /// Every item the turn appended, in order.
    pub new_items: Vec<Item>,
    /// Usage accumulated across all tool rounds.
    pub usage: Usage,
}

/// Fallback consulted under [`UnhandledToolPolicy::RaiseEvent`] when the
/// model requests a tool with no registered executor. The wait is bounded
/// by the tool timeout; `None` rejects the call.
#[async_trait]
pub trait UnhandledToolHandler: Send + Sync {
    async fn handle(&self, call: &ToolCall) -> Option<ToolResult>;
}

/// Session controller owning one active conversation.
pub struct Session<P: ChatProvider> {
    provider: Arc<P>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    options: SessionOptions,
    approval: Option<Arc<dyn ApprovalHandler>>,
    unhandled: Option<Arc<dyn UnhandledToolHandler>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    audio: Option<AudioController>,
    conversation: Option<Conversation>,
    state: TurnState,
    cancel: CancellationToken,
    last_save: Option<Instant>,
}

impl<P: ChatProvider> Session<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            tools: Arc::new(ToolRegistry::new()),
            store: Arc::new(MemoryStore::new()),
            options: SessionOptions::default(),
            approval: None,
            unhandled: None,
            summarizer: None,
            audio: None,
            conversation: None,
            state: TurnState::Idle,
            cancel: CancellationToken::new(),
            last_save: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub fn with_unhandled_handler(mut self, handler: Arc<dyn UnhandledToolHandler>) -> Self {
        self.unhandled = Some(handler);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_audio(mut self, audio: AudioController) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The active conversation, if any.
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Load an existing conversation from the store and make it active.
    pub async fn open(&mut self, id: ConversationId) -> Result<(), AgentError> {
        let conversation = self.store.load(id).await?;
        info!("Opened conversation {id} with {} items", conversation.len());
        self.conversation = Some(conversation);
        Ok(())
    }

    /// Create a new conversation and make it active.
    pub async fn open_new(
        &mut self,
        metadata: Option<Metadata>,
    ) -> Result<ConversationId, AgentError> {
        let conversation = self.store.create(metadata).await?;
        let id = conversation.id;
        self.conversation = Some(conversation);
        Ok(id)
    }

    /// Request cancellation of the in-flight turn. In-flight provider and
    /// tool calls are signalled to stop; the turn resolves with
    /// [`AgentError::Cancelled`] and no items are persisted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle for cancelling from another task. Valid until a turn is
    /// cancelled; the next turn after a cancellation uses a fresh token,
    /// so obtain a new handle then.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Persist the active conversation unconditionally.
    pub async fn flush(&mut self) -> Result<(), AgentError> {
        if let Some(conversation) = &self.conversation {
            self.store.save(conversation).await?;
            self.last_save = Some(Instant::now());
        }
        Ok(())
    }

    /// Send one user input and drive the turn to completion.
    pub async fn send(&mut self, input: impl Into<String>) -> Result<TurnOutcome, AgentError> {
        let input = input.into();
        self.validate(&input)?;
        let pending = vec![Item::Message(Message::user(&input))];
        self.run_turn(pending).await
    }

    /// Send recorded audio: transcribe, run the turn, synthesize the reply.
    pub async fn send_audio(
        &mut self,
        audio: Vec<u8>,
    ) -> Result<(TurnOutcome, Vec<u8>), AgentError> {
        let controller = self
            .audio
            .as_ref()
            .ok_or_else(|| AgentError::Validation("no audio controller configured".into()))?;

        let (text, input_event) = controller.listen(audio).await?;
        self.validate(&text)?;

        let pending = vec![
            Item::AudioEvent(input_event),
            Item::Message(Message::user(&text)),
        ];
        let outcome = self.run_turn(pending).await?;

        let controller = self
            .audio
            .as_ref()
            .ok_or_else(|| AgentError::Validation("no audio controller configured".into()))?;
        let (reply_audio, output_event) = controller.speak(&outcome.message.text()).await?;
        if let Some(conversation) = self.conversation.as_mut() {
            conversation.push(Item::AudioEvent(output_event));
        }
        self.maybe_save().await?;

        Ok((outcome, reply_audio))
    }

    fn validate(&self, input: &str) -> Result<(), AgentError> {
        if input.trim().is_empty() {
            return Err(AgentError::Validation("input must not be empty".into()));
        }
        if let ToolChoice::Required(name) = &self.options.tool_choice {
            if !self.tools.contains(name) {
                return Err(AgentError::Validation(format!(
                    "required tool {name} is not registered"
                )));
            }
        }
        Ok(())
    }

    async fn ensure_conversation(&mut self) -> Result<(), AgentError> {
        if self.conversation.is_none() {
            self.open_new(None).await?;
        }
        Ok(())
    }

    /// Record the terminal state for an error and hand it back.
    fn fail(&mut self, error: AgentError) -> AgentError {
        self.state = match &error {
            AgentError::Cancelled => TurnState::Cancelled,
            AgentError::Validation(_) | AgentError::Context(_) => TurnState::Idle,
            _ => TurnState::Failed,
        };
        error
    }

    /// Core non-streaming turn pipeline.
    async fn run_turn(&mut self, pending: Vec<Item>) -> Result<TurnOutcome, AgentError> {
        self.state = TurnState::Dispatched;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.ensure_conversation().await?;

        let mut staged: Vec<Item> = pending;
        let mut staged_summary: Option<String> = None;
        let mut total_usage = Usage::default();
        let mut final_turn: Option<ProviderTurn> = None;

        for round in 0..self.options.max_tool_depth {
            debug!("Turn round {}/{}", round + 1, self.options.max_tool_depth);
            self.state = TurnState::AwaitingProviderResponse;

            let payload = self.assemble_payload(&staged, &mut staged_summary).await;
            let payload = payload.map_err(|e| self.fail(e))?;
            let turn = self
                .call_provider(payload)
                .await
                .map_err(|e| self.fail(e))?;

            if let Some(usage) = turn.usage {
                total_usage += usage;
            }

            if !turn.has_tool_calls() {
                final_turn = Some(turn);
                break;
            }

            self.state = TurnState::ToolCallPending;
            // Assistant text accompanying tool calls stays in history so
            // the resubmitted context and the conversation both carry it.
            if !turn.parts.is_empty() {
                staged.push(Item::Message(Message::new(
                    Role::Assistant,
                    turn.parts.clone(),
                )));
            }
            let calls = turn.tool_calls.clone();
            for call in &calls {
                staged.push(Item::ToolCall(call.clone()));
            }

            let outputs = self
                .resolve_calls(&calls, None)
                .await
                .map_err(|e| self.fail(e))?;

            self.state = TurnState::AwaitingToolResubmission;
            staged.extend(outputs.into_iter().map(Item::ToolOutput));
        }

        let turn = final_turn
            .ok_or(AgentError::MaxDepthExceeded(self.options.max_tool_depth))
            .map_err(|e| self.fail(e))?;

        let message = Message::new(Role::Assistant, turn.parts.clone());
        let outcome = self
            .finalize(staged, staged_summary, message, total_usage)
            .await;
        outcome.map_err(|e| self.fail(e))
    }

    /// Commit staged items, the staged summary and the finalized assistant
    /// message, then run the store's save hook per the persistence policy.
    async fn finalize(
        &mut self,
        staged: Vec<Item>,
        staged_summary: Option<String>,
        mut message: Message,
        usage: Usage,
    ) -> Result<TurnOutcome, AgentError> {
        self.state = TurnState::Finalizing;
        message.freeze();

        let mut new_items = staged;
        new_items.push(Item::Message(message.clone()));

        let conversation = self
            .conversation
            .as_mut()
            .ok_or_else(|| AgentError::Validation("no active conversation".into()))?;
        if let Some(summary) = staged_summary {
            conversation.summary = Some(summary);
        }
        for item in &new_items {
            conversation.push(item.clone());
        }

        let outcome = TurnOutcome {
            message,
            new_items,
            usage,
        };

        self.maybe_save().await?;
        self.state = TurnState::Idle;
        Ok(outcome)
    }

    async fn maybe_save(&mut self) -> Result<(), AgentError> {
        let due = match self.options.persistence {
            PersistencePolicy::Immediate => true,
            PersistencePolicy::Debounced(interval) => self
                .last_save
                .map(|at| at.elapsed() >= interval)
                .unwrap_or(true),
            PersistencePolicy::Manual => false,
        };
        if due {
            self.flush().await?;
        }
        Ok(())
    }

    /// Assemble the request payload, folding evicted items into the memory
    /// summary when summarization is due.
    ///
    /// The new summary is staged in `staged_summary` alongside the turn's
    /// item buffer; the stored conversation is untouched until finalize.
    /// At most one summarization happens per turn, so later tool rounds
    /// reuse the staged summary instead of re-folding the same drops.
    async fn assemble_payload(
        &self,
        pending: &[Item],
        staged_summary: &mut Option<String>,
    ) -> Result<RequestPayload, AgentError> {
        let conversation = self
            .conversation
            .as_ref()
            .ok_or_else(|| AgentError::Validation("no active conversation".into()))?;

        let mut assembled = assemble(
            conversation,
            pending,
            self.options.instructions.as_deref(),
            self.tools.specs(),
            &self.options.context,
        )?;
        assembled.payload.tool_choice = self.options.tool_choice.clone();

        if staged_summary.is_none()
            && should_summarize(conversation, &assembled.dropped, &self.options.context)
        {
            if let Some(summarizer) = &self.summarizer {
                let previous = conversation.summary.as_deref();
                let summary = summarizer.summarize(previous, &assembled.dropped).await?;
                debug!("Staged memory summary ({} chars)", summary.len());
                *staged_summary = Some(summary);
            }
        }
        if let Some(summary) = staged_summary {
            assembled.payload.summary = Some(summary.clone());
        }

        Ok(assembled.payload)
    }

    /// Call the provider with timeout, cancellation and bounded retries.
    /// Only retryable provider errors are retried; tool execution never is.
    async fn call_provider(&self, payload: RequestPayload) -> Result<ProviderTurn, AgentError> {
        let retry = self.options.retry;
        let mut backoff = retry.backoff;

        for attempt in 1..=retry.max_attempts {
            let call = self.provider.send(payload.clone());
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(self.options.provider_timeout, call) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                },
            };

            match result {
                Ok(turn) => return Ok(turn),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    warn!("Provider call failed (attempt {attempt}): {e}, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AgentError::Provider(ProviderError::Unavailable(
            "retry budget exhausted".into(),
        )))
    }

    /// Resolve every tool call from one response to an output, honoring
    /// approval gates, the unhandled-tool policy and the provider's
    /// ordering requirement.
    async fn resolve_calls(
        &mut self,
        calls: &[ToolCall],
        mut events: Option<&mut Vec<TurnEvent>>,
    ) -> Result<Vec<ToolOutput>, AgentError> {
        // Approval gates run sequentially up front; they are user-driven
        // and must not race each other.
        let mut approved: Vec<(ToolCall, bool, &'static str)> = Vec::with_capacity(calls.len());
        for call in calls {
            let registration = self.tools.get(&call.name);
            if registration.is_none() {
                if let Some(events) = events.as_mut() {
                    events.push(TurnEvent::UnhandledToolCall(call.clone()));
                }
            }
            let needs_approval = registration
                .as_ref()
                .map(|r| r.requires_approval())
                .unwrap_or(false);

            if needs_approval {
                self.state = TurnState::AwaitingApproval;
                if let Some(events) = events.as_mut() {
                    events.push(TurnEvent::ApprovalRequested(call.clone()));
                }
                let decision = match &self.approval {
                    Some(handler) => {
                        await_approval(
                            handler.as_ref(),
                            call,
                            self.options.approval_timeout,
                            &self.cancel,
                        )
                        .await
                    }
                    None => ApprovalDecision::Denied,
                };
                if self.cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                if !decision.is_approved() {
                    let reason = match decision {
                        ApprovalDecision::TimedOut => "tool call approval timed out",
                        _ => "tool call denied by user",
                    };
                    info!("Tool call {} rejected: {reason}", call.name);
                    approved.push((call.clone(), false, reason));
                    continue;
                }
            }
            approved.push((call.clone(), true, ""));
        }

        self.state = TurnState::ExecutingTools;
        let parallel = self.options.parallel_tool_calls
            && self.provider.supports_parallel_tool_calls()
            && approved.len() > 1;

        let mut outputs: Vec<ToolOutput> = if parallel {
            let futures = approved
                .iter()
                .map(|(call, ok, reason)| self.resolve_one(call, *ok, reason));
            join_all(futures)
                .await
                .into_iter()
                .collect::<Result<_, _>>()?
        } else {
            let mut outputs = Vec::with_capacity(approved.len());
            for (call, ok, reason) in &approved {
                outputs.push(self.resolve_one(call, *ok, reason).await?);
            }
            outputs
        };

        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        // Resubmission order: match the request order when the provider
        // demands it. Outputs always reference their call id either way.
        if self.provider.ordered_tool_results() {
            let order: Vec<_> = calls.iter().map(|c| c.id.clone()).collect();
            outputs.sort_by_key(|o| order.iter().position(|id| *id == o.call_id));
        }

        if let Some(events) = events.as_mut() {
            for output in &outputs {
                events.push(TurnEvent::ToolCallFinished(output.clone()));
            }
        }

        Ok(outputs)
    }

    /// Resolve a single call: rejection, registered dispatch, or the
    /// unhandled-tool policy. Execution errors and timeouts are absorbed
    /// into error outputs; only cancellation escapes.
    async fn resolve_one(
        &self,
        call: &ToolCall,
        approved: bool,
        rejection: &str,
    ) -> Result<ToolOutput, AgentError> {
        if !approved {
            return Ok(ToolOutput::error(call, rejection));
        }

        if let Some(output) = self
            .tools
            .dispatch(call, self.options.tool_timeout, &self.cancel)
            .await
        {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            return Ok(output);
        }

        // No registered executor.
        match self.options.unhandled_tools {
            UnhandledToolPolicy::AutoReject => {
                warn!(
                    "No executor registered for tool {}, auto-rejecting",
                    call.name
                );
                Ok(ToolOutput::error(
                    call,
                    format!("no executor registered for tool {}", call.name),
                ))
            }
            UnhandledToolPolicy::RaiseEvent => {
                let resolution = match &self.unhandled {
                    Some(handler) => tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        answer = tokio::time::timeout(
                            self.options.tool_timeout,
                            handler.handle(call),
                        ) => answer.ok().flatten(),
                    },
                    None => None,
                };
                Ok(match resolution {
                    Some(ToolResult::Success { value }) => ToolOutput::success(call, value),
                    Some(ToolResult::Error { message }) => ToolOutput::error(call, message),
                    None => ToolOutput::error(
                        call,
                        format!("tool {} was not handled externally", call.name),
                    ),
                })
            }
        }
    }
}

impl<P: StreamingChatProvider> Session<P> {
    /// Streaming variant of [`Session::send`]: emits [`TurnEvent`]s in the
    /// order they occur, ending with `TurnCompleted`.
    ///
    /// Text deltas are forwarded in provider emission order; tool rounds
    /// run between streamed responses exactly as in the non-streaming
    /// path.
    pub fn send_stream<'a>(
        &'a mut self,
        input: impl Into<String>,
    ) -> impl Stream<Item = Result<TurnEvent, AgentError>> + 'a {
        let input = input.into();

        async_stream::try_stream! {
            self.validate(&input)?;
            self.state = TurnState::Dispatched;
            if self.cancel.is_cancelled() {
                self.cancel = CancellationToken::new();
            }
            self.ensure_conversation().await?;

            let user_item = Item::Message(Message::user(&input));
            let mut staged = vec![user_item.clone()];
            yield TurnEvent::ItemAdded(user_item);

            let mut staged_summary: Option<String> = None;
            let mut total_usage = Usage::default();
            let mut final_message: Option<Message> = None;

            for round in 0..self.options.max_tool_depth {
                debug!(
                    "Streaming turn round {}/{}",
                    round + 1,
                    self.options.max_tool_depth
                );
                self.state = TurnState::AwaitingProviderResponse;

                let payload = self.assemble_payload(&staged, &mut staged_summary).await;
                let payload = payload.map_err(|e| self.fail(e))?;
                let open = self.open_stream(payload).await;
                let mut stream = open.map_err(|e| self.fail(e))?;

                self.state = TurnState::StreamingPartial;
                let mut partial = Message::new(Role::Assistant, Vec::new());
                partial.partial = true;
                let mut calls: Vec<ToolCall> = Vec::new();

                loop {
                    let next = tokio::select! {
                        _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                        token = stream.next() => Ok(token),
                    };
                    let token = next.map_err(|e| self.fail(e))?;
                    let Some(token) = token else { break };
                    let token =
                        token.map_err(|e| self.fail(AgentError::Provider(e)))?;

                    match token {
                        Token::Text(delta) => {
                            partial.push_text(&delta);
                            yield TurnEvent::TextDelta(delta);
                        }
                        Token::ToolCall(call) => {
                            yield TurnEvent::ToolCallStarted(call.clone());
                            calls.push(call);
                        }
                        Token::Usage(usage) => {
                            total_usage += usage;
                            yield TurnEvent::Usage(usage);
                        }
                        Token::Finish(_) => {}
                    }
                }

                if calls.is_empty() {
                    final_message = Some(partial);
                    break;
                }

                self.state = TurnState::ToolCallPending;
                // Text streamed alongside tool calls was already delivered
                // as deltas; keep it in history as its own assistant item.
                if !partial.parts.is_empty() {
                    partial.freeze();
                    let item = Item::Message(partial);
                    staged.push(item.clone());
                    yield TurnEvent::ItemAdded(item);
                }
                for call in &calls {
                    let item = Item::ToolCall(call.clone());
                    staged.push(item.clone());
                    yield TurnEvent::ItemAdded(item);
                }

                let mut round_events = Vec::new();
                let outputs = self
                    .resolve_calls(&calls, Some(&mut round_events))
                    .await
                    .map_err(|e| self.fail(e))?;
                for event in round_events {
                    yield event;
                }

                self.state = TurnState::AwaitingToolResubmission;
                for output in outputs {
                    let item = Item::ToolOutput(output);
                    staged.push(item.clone());
                    yield TurnEvent::ItemAdded(item);
                }
            }

            let message = final_message
                .ok_or(AgentError::MaxDepthExceeded(self.options.max_tool_depth))
                .map_err(|e| self.fail(e))?;

            let outcome = self.finalize(staged, staged_summary, message, total_usage).await;
            let outcome = outcome.map_err(|e| self.fail(e))?;
            yield TurnEvent::TurnCompleted(outcome.message);
        }
    }

    /// Open the provider token stream with timeout, cancellation and
    /// bounded retries on stream initiation. Mid-stream errors are not
    /// retried.
    async fn open_stream(
        &self,
        payload: RequestPayload,
    ) -> Result<futures::stream::BoxStream<'static, Result<Token, ProviderError>>, AgentError> {
        let retry = self.options.retry;
        let mut backoff = retry.backoff;

        for attempt in 1..=retry.max_attempts {
            let call = self.provider.stream(payload.clone());
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(self.options.provider_timeout, call) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                },
            };

            match result {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    warn!("Stream open failed (attempt {attempt}): {e}, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AgentError::Provider(ProviderError::Unavailable(
            "retry budget exhausted".into(),
        )))
    }
}
