use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use genagent::model::{Item, Message, Part, ToolCall, ToolCallId, ToolResult, TurnEvent, Usage};
use genagent::options::{
    ContextOptions, RetryOptions, SessionOptions, ToolChoice, UnhandledToolPolicy,
};
use genagent::provider::{
    ChatProvider, ProviderError, ProviderTurn, RequestPayload, StreamingChatProvider, Token,
};
use genagent::session::{AgentError, Session, TurnState};
use genagent::store::{ConversationStore, MemoryStore};
use genagent::tools::{ToolRegistration, ToolRegistry};
use genagent::Summarizer;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted provider: pops one pre-built turn per call and records every
/// request payload it sees.
struct MockProvider {
    turns: Mutex<VecDeque<ProviderTurn>>,
    requests: Arc<Mutex<Vec<RequestPayload>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    fn new(turns: Vec<ProviderTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn requests(&self) -> Arc<Mutex<Vec<RequestPayload>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn send(&self, payload: RequestPayload) -> Result<ProviderTurn, ProviderError> {
        self.requests.lock().unwrap().push(payload);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidRequest("no more scripted turns".into()))
    }
}

fn text_turn(text: &str) -> ProviderTurn {
    ProviderTurn {
        parts: vec![Part::text(text)],
        usage: Some(Usage {
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
        }),
        ..Default::default()
    }
}

fn tool_turn(calls: Vec<ToolCall>) -> ProviderTurn {
    ProviderTurn {
        tool_calls: calls,
        ..Default::default()
    }
}

fn text_and_tool_turn(text: &str, calls: Vec<ToolCall>) -> ProviderTurn {
    ProviderTurn {
        parts: vec![Part::text(text)],
        tool_calls: calls,
        ..Default::default()
    }
}

fn echo_registry() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.register(ToolRegistration::local(
        "echo",
        "Echo the arguments",
        json!({"type": "object"}),
        |args| async move { Ok(args) }.boxed(),
    ));
    Arc::new(registry)
}

// A plain exchange appends exactly one user and one assistant message to
// the same conversation.
#[tokio::test]
async fn simple_chat_appends_two_messages() {
    init_tracing();
    let provider = MockProvider::new(vec![text_turn("Hi there")]);
    let mut session = Session::new(provider);

    let outcome = session.send("Hello").await.unwrap();

    assert_eq!(outcome.message.text(), "Hi there");
    assert_eq!(outcome.usage.prompt_tokens, Some(10));

    let conversation = session.conversation().unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(
        conversation.items[0].as_message().unwrap().text(),
        "Hello"
    );
    assert_eq!(
        conversation.items[1].as_message().unwrap().text(),
        "Hi there"
    );
    assert_eq!(session.state(), TurnState::Idle);
}

#[tokio::test]
async fn conversation_id_is_stable_across_turns() {
    let provider = MockProvider::new(vec![text_turn("one"), text_turn("two")]);
    let mut session = Session::new(provider);

    session.send("first").await.unwrap();
    let id = session.conversation().unwrap().id;
    session.send("second").await.unwrap();

    assert_eq!(session.conversation().unwrap().id, id);
    assert_eq!(session.conversation().unwrap().len(), 4);
}

// An unregistered tool under AutoReject still finalizes the turn with a
// synthesized error output.
#[tokio::test]
async fn unregistered_tool_auto_rejects_and_finalizes() {
    let call = ToolCall::new("get_weather", json!({"city": "Oslo"}));
    let provider = MockProvider::new(vec![tool_turn(vec![call.clone()]), text_turn("no data")]);
    let mut session = Session::new(provider).with_options(
        SessionOptions::new().with_unhandled_tools(UnhandledToolPolicy::AutoReject),
    );

    let outcome = session.send("weather?").await.unwrap();

    assert_eq!(outcome.message.text(), "no data");
    let conversation = session.conversation().unwrap();
    // user, tool call, tool output, assistant
    assert_eq!(conversation.len(), 4);
    let output = conversation.items[2].as_tool_output().unwrap();
    assert_eq!(output.call_id, call.id);
    assert!(output.result.is_error());
}

// Two parallel tool calls both resolve with matching ids before the turn
// finalizes.
#[tokio::test]
async fn parallel_tool_calls_both_resolve() {
    let call_a = ToolCall::new("echo", json!({"v": "a"}));
    let call_b = ToolCall::new("echo", json!({"v": "b"}));
    let provider = MockProvider::new(vec![
        tool_turn(vec![call_a.clone(), call_b.clone()]),
        text_turn("done"),
    ]);

    let mut session = Session::new(provider)
        .with_tools(echo_registry())
        .with_options(SessionOptions::new().with_parallel_tool_calls(true));

    let outcome = session.send("run both").await.unwrap();
    assert_eq!(outcome.message.text(), "done");

    let conversation = session.conversation().unwrap();
    let outputs: Vec<_> = conversation
        .items
        .iter()
        .filter_map(Item::as_tool_output)
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].call_id, call_a.id);
    assert_eq!(outputs[1].call_id, call_b.id);
    assert_eq!(
        outputs[0].result,
        ToolResult::Success {
            value: json!({"v": "a"})
        }
    );
    assert!(conversation.unresolved_tool_calls().is_empty());
}

struct FakeSummarizer;

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        dropped: &[Item],
    ) -> Result<String, ProviderError> {
        Ok(format!(
            "{}+{} items",
            previous.unwrap_or("start"),
            dropped.len()
        ))
    }
}

// History beyond the message cap is summarized out of the request but
// stays in the persisted conversation.
#[tokio::test]
async fn summarization_compresses_old_history() {
    let provider = MockProvider::new(vec![
        text_turn("r1"),
        text_turn("r2"),
        text_turn("r3"),
    ]);
    let requests = provider.requests();
    let store = Arc::new(MemoryStore::new());

    let mut session = Session::new(provider)
        .with_store(store.clone())
        .with_summarizer(Arc::new(FakeSummarizer))
        .with_options(SessionOptions::new().with_context(ContextOptions {
            max_context_tokens: 100_000,
            response_reserve: 0,
            max_context_messages: 2,
            summarize: true,
        }));

    session.send("first message").await.unwrap();
    session.send("second message").await.unwrap();
    session.send("third message").await.unwrap();

    let conversation = session.conversation().unwrap();
    assert!(conversation.summary.is_some());
    // Every raw item is still persisted.
    assert_eq!(conversation.len(), 6);
    let persisted = store.load(conversation.id).await.unwrap();
    assert_eq!(persisted.len(), 6);
    assert_eq!(persisted.summary, conversation.summary);

    // The last request carried the summary and a capped history suffix.
    let last = requests.lock().unwrap();
    let last = last.last().unwrap();
    assert!(last.summary.is_some());
    assert!(last.items.len() <= 3);
}

// A summary computed while a turn is in flight must not survive that
// turn failing; it commits only at finalization.
#[tokio::test]
async fn failed_turn_leaves_summary_untouched() {
    // Two successful turns build history, the third provider call fails
    // (the script is exhausted).
    let provider = MockProvider::new(vec![text_turn("r1"), text_turn("r2")]);
    let mut session = Session::new(provider)
        .with_summarizer(Arc::new(FakeSummarizer))
        .with_options(SessionOptions::new().with_context(ContextOptions {
            max_context_tokens: 100_000,
            response_reserve: 0,
            max_context_messages: 2,
            summarize: true,
        }));

    session.send("first message").await.unwrap();
    session.send("second message").await.unwrap();
    let summary_before = session.conversation().unwrap().summary.clone();
    let items_before = session.conversation().unwrap().len();

    let err = session.send("third message").await.unwrap_err();
    assert!(matches!(err, AgentError::Provider(_)));

    let conversation = session.conversation().unwrap();
    assert_eq!(conversation.summary, summary_before);
    assert_eq!(conversation.len(), items_before);
}

// Assistant text accompanying tool calls must reach both the conversation
// and the resubmitted context, not just the caller.
#[tokio::test]
async fn tool_round_text_is_kept_in_history() {
    let call = ToolCall::new("echo", json!({"q": 1}));
    let provider = MockProvider::new(vec![
        text_and_tool_turn("Let me check that.", vec![call.clone()]),
        text_turn("It is sunny."),
    ]);
    let requests = provider.requests();
    let mut session = Session::new(provider).with_tools(echo_registry());

    let outcome = session.send("weather?").await.unwrap();
    assert_eq!(outcome.message.text(), "It is sunny.");

    let conversation = session.conversation().unwrap();
    // user, interim assistant text, tool call, tool output, final assistant
    assert_eq!(conversation.len(), 5);
    assert_eq!(
        conversation.items[1].as_message().unwrap().text(),
        "Let me check that."
    );
    assert!(conversation.items[2].as_tool_call().is_some());

    let requests = requests.lock().unwrap();
    assert!(requests[1]
        .items
        .iter()
        .filter_map(Item::as_message)
        .any(|m| m.text() == "Let me check that."));
}

// A provider timeout fails the turn and leaves the conversation
// untouched.
#[tokio::test(start_paused = true)]
async fn provider_timeout_fails_cleanly() {
    let provider =
        MockProvider::new(vec![text_turn("never delivered")]).with_delay(Duration::from_secs(600));
    let mut session = Session::new(provider).with_options(
        SessionOptions::new()
            .with_provider_timeout(Duration::from_millis(100))
            .with_retry(RetryOptions {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            }),
    );

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, AgentError::Provider(ProviderError::Timeout)));
    assert_eq!(session.state(), TurnState::Failed);
    assert!(session.conversation().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retryable_errors_consume_the_retry_budget() {
    struct AlwaysUnavailable;

    #[async_trait]
    impl ChatProvider for AlwaysUnavailable {
        async fn send(&self, _payload: RequestPayload) -> Result<ProviderTurn, ProviderError> {
            Err(ProviderError::Unavailable("down".into()))
        }
    }

    let mut session = Session::new(AlwaysUnavailable).with_options(
        SessionOptions::new().with_retry(RetryOptions {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }),
    );

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Provider(ProviderError::Unavailable(_))
    ));
    assert_eq!(session.state(), TurnState::Failed);
}

// Cancellation cleanliness: the conversation after a cancelled turn is
// identical to the conversation before it started.
#[tokio::test]
async fn cancellation_discards_partial_turn() {
    let provider = MockProvider::new(vec![text_turn("a"), text_turn("b")])
        .with_delay(Duration::from_secs(60));
    let mut session = Session::new(provider);

    let handle = session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(session.state(), TurnState::Cancelled);
    assert!(session.conversation().unwrap().is_empty());
}

#[tokio::test]
async fn empty_input_is_rejected_without_side_effects() {
    let provider = MockProvider::new(vec![]);
    let mut session = Session::new(provider);

    let err = session.send("   ").await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
    assert!(session.conversation().is_none());
}

#[tokio::test]
async fn required_unregistered_tool_is_a_validation_error() {
    let provider = MockProvider::new(vec![text_turn("unreachable")]);
    let mut session = Session::new(provider).with_options(
        SessionOptions::new().with_tool_choice(ToolChoice::Required("missing".into())),
    );

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
}

#[tokio::test]
async fn tool_depth_is_bounded() {
    // Every scripted turn requests another tool call; the session must
    // stop at the configured depth instead of looping.
    let turns: Vec<ProviderTurn> = (0..5)
        .map(|i| tool_turn(vec![ToolCall::new("echo", json!({ "round": i }))]))
        .collect();
    let mut session = Session::new(MockProvider::new(turns))
        .with_tools(echo_registry())
        .with_options(SessionOptions::new().with_max_tool_depth(3));

    let err = session.send("loop").await.unwrap_err();
    assert!(matches!(err, AgentError::MaxDepthExceeded(3)));
    assert_eq!(session.state(), TurnState::Failed);
    assert!(session.conversation().unwrap().is_empty());
}

// --- streaming ---

/// Streaming provider scripted as lists of tokens, one list per call.
struct MockStreamProvider {
    scripts: Mutex<VecDeque<Vec<Token>>>,
}

impl MockStreamProvider {
    fn new(scripts: Vec<Vec<Token>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl ChatProvider for MockStreamProvider {
    async fn send(&self, _payload: RequestPayload) -> Result<ProviderTurn, ProviderError> {
        Err(ProviderError::InvalidRequest("use stream".into()))
    }
}

#[async_trait]
impl StreamingChatProvider for MockStreamProvider {
    async fn stream(
        &self,
        _payload: RequestPayload,
    ) -> Result<futures::stream::BoxStream<'static, Result<Token, ProviderError>>, ProviderError>
    {
        let tokens = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidRequest("no more scripted streams".into()))?;
        Ok(Box::pin(futures::stream::iter(
            tokens.into_iter().map(Ok),
        )))
    }
}

#[tokio::test]
async fn streaming_turn_emits_deltas_in_order() {
    let provider = MockStreamProvider::new(vec![vec![
        Token::Text("Hel".into()),
        Token::Text("lo".into()),
        Token::Finish(genagent::model::FinishReason::Stop),
    ]]);
    let mut session = Session::new(provider);

    let events: Vec<TurnEvent> = {
        let stream = session.send_stream("hi");
        stream.map(|e| e.unwrap()).collect().await
    };

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::TextDelta(d) => Some(d.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo"]);

    let completed = events.iter().rev().find_map(|e| match e {
        TurnEvent::TurnCompleted(m) => Some(m.clone()),
        _ => None,
    });
    let message = completed.unwrap();
    assert_eq!(message.text(), "Hello");
    assert!(!message.partial);

    let conversation = session.conversation().unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.items[1].as_message().unwrap().text(), "Hello");
}

#[tokio::test]
async fn streaming_tool_round_resolves_before_completion() {
    let call = ToolCall {
        id: ToolCallId::from("call-1"),
        name: "echo".into(),
        arguments: json!({"x": 1}),
    };
    let provider = MockStreamProvider::new(vec![
        vec![
            Token::ToolCall(call.clone()),
            Token::Finish(genagent::model::FinishReason::ToolCalls),
        ],
        vec![
            Token::Text("after tools".into()),
            Token::Finish(genagent::model::FinishReason::Stop),
        ],
    ]);
    let mut session = Session::new(provider).with_tools(echo_registry());

    let events: Vec<TurnEvent> = {
        let stream = session.send_stream("go");
        stream.map(|e| e.unwrap()).collect().await
    };

    let started = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolCallStarted(_)))
        .unwrap();
    let finished = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolCallFinished(o) if o.call_id == call.id))
        .unwrap();
    let completed = events
        .iter()
        .position(|e| matches!(e, TurnEvent::TurnCompleted(_)))
        .unwrap();
    assert!(started < finished && finished < completed);

    let conversation = session.conversation().unwrap();
    assert!(conversation.unresolved_tool_calls().is_empty());
    // user, tool call, tool output, assistant
    assert_eq!(conversation.len(), 4);
}

// Text streamed before a tool call is already delivered as deltas; it
// must also land in the conversation as its own frozen assistant item.
#[tokio::test]
async fn streamed_tool_round_text_reaches_the_conversation() {
    let call = ToolCall {
        id: ToolCallId::from("call-9"),
        name: "echo".into(),
        arguments: json!({}),
    };
    let provider = MockStreamProvider::new(vec![
        vec![
            Token::Text("Let me check that.".into()),
            Token::ToolCall(call.clone()),
            Token::Finish(genagent::model::FinishReason::ToolCalls),
        ],
        vec![
            Token::Text("It is sunny.".into()),
            Token::Finish(genagent::model::FinishReason::Stop),
        ],
    ]);
    let mut session = Session::new(provider).with_tools(echo_registry());

    let events: Vec<TurnEvent> = {
        let stream = session.send_stream("weather?");
        stream.map(|e| e.unwrap()).collect().await
    };

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::TextDelta(d) => Some(d.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Let me check that.", "It is sunny."]);

    let conversation = session.conversation().unwrap();
    assert_eq!(conversation.len(), 5);
    let texts: Vec<String> = conversation
        .items
        .iter()
        .filter_map(Item::as_message)
        .map(Message::text)
        .collect();
    assert_eq!(
        texts,
        vec!["weather?", "Let me check that.", "It is sunny."]
    );
    assert!(!conversation.items[1].as_message().unwrap().partial);
}
