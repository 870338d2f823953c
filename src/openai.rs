//! Reference OpenAI-compatible Chat Completions adapter.
//!
//! Implements [`ChatProvider`] and [`StreamingChatProvider`] against any
//! endpoint speaking the Chat Completions wire format. Serves both as a
//! usable adapter and as the template for writing others.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{FinishReason, Item, Part, Role, ToolCall, ToolCallId, Usage};
use crate::options::{HttpOptions, ToolChoice};
use crate::provider::{
    ChatProvider, ProviderError, ProviderTurn, RequestPayload, StreamingChatProvider, Token,
};
use crate::sse::SseResponseExt;

/// Adapter for OpenAI-compatible Chat Completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiChatAdapter {
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    http: HttpOptions,
    ordered_tool_results: bool,
}

impl OpenAiChatAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            model: model.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            http: HttpOptions::default(),
            ordered_tool_results: true,
        }
    }

    /// Point the adapter at a compatible non-OpenAI endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }

    /// Relax ordered tool-output resubmission for endpoints that accept
    /// outputs in completion order.
    pub fn with_ordered_tool_results(mut self, ordered: bool) -> Self {
        self.ordered_tool_results = ordered;
        self
    }

    fn map_error(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> ProviderError {
        let detail = serde_json::from_str::<ChatErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status.as_u16() {
            401 | 403 => ProviderError::Auth,
            429 => ProviderError::RateLimited { retry_after },
            400 | 404 | 422 => ProviderError::InvalidRequest(detail),
            s if s >= 500 => ProviderError::Unavailable(detail),
            s => ProviderError::MalformedResponse(format!("HTTP {s}: {detail}")),
        }
    }

    async fn post_request(&self, body: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let http_client = build_http_client(&self.http)?;

        let mut req = http_client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json");
        req = add_extra_headers(req, &self.http);

        let response = req.json_logged(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error(status, &body, retry_after));
        }

        Ok(response)
    }

    fn build_request(&self, payload: &RequestPayload) -> ChatRequest {
        let mut messages = Vec::new();

        if let Some(instructions) = &payload.instructions {
            messages.push(ChatMessage::system(instructions.clone()));
        }
        if let Some(summary) = &payload.summary {
            messages.push(ChatMessage::system(format!(
                "Summary of earlier conversation:\n{summary}"
            )));
        }
        for item in &payload.items {
            if let Some(msg) = ChatMessage::from_item(item) {
                messages.push(msg);
            }
        }

        let tools = if payload.tools.is_empty() {
            None
        } else {
            Some(
                payload
                    .tools
                    .iter()
                    .map(|spec| ChatTool {
                        tool_type: "function".to_string(),
                        function: ChatFunction {
                            name: spec.name.clone(),
                            description: Some(spec.description.clone()),
                            parameters: spec.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let tool_choice = match &payload.tool_choice {
            ToolChoice::Auto => None,
            ToolChoice::None => Some(serde_json::json!("none")),
            ToolChoice::Required(name) => Some(serde_json::json!({
                "type": "function",
                "function": { "name": name },
            })),
        };

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stream: None,
            stream_options: None,
            tools,
            tool_choice,
        }
    }

    fn process_stream(
        response: reqwest::Response,
    ) -> BoxStream<'static, Result<Token, ProviderError>> {
        let sse_stream = response.sse().map(|result| {
            result.and_then(|line| {
                serde_json::from_str::<ChatStreamChunk>(&line).map_err(ProviderError::Parse)
            })
        });

        // Tool-call argument fragments are coalesced per index and flushed
        // when the finish reason arrives.
        let stream = async_stream::try_stream! {
            futures::pin_mut!(sse_stream);
            let mut pending_calls: Vec<PendingToolCall> = Vec::new();

            while let Some(chunk) = sse_stream.next().await {
                let chunk = chunk?;
                let Some(choice) = chunk.choices.into_iter().next() else {
                    if let Some(usage) = chunk.usage {
                        yield Token::Usage(usage.into());
                    }
                    continue;
                };

                if let Some(delta) = choice.delta {
                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            yield Token::Text(content);
                        }
                    }
                    for tc in delta.tool_calls.unwrap_or_default() {
                        let index = tc.index.unwrap_or(0);
                        while pending_calls.len() <= index {
                            pending_calls.push(PendingToolCall::default());
                        }
                        let pending = &mut pending_calls[index];
                        if let Some(id) = tc.id {
                            pending.id = Some(id);
                        }
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                pending.name = Some(name);
                            }
                            if let Some(arguments) = function.arguments {
                                pending.arguments.push_str(&arguments);
                            }
                        }
                    }
                }

                if let Some(reason) = choice.finish_reason {
                    for pending in pending_calls.drain(..) {
                        if let Some(call) = pending.into_tool_call() {
                            yield Token::ToolCall(call);
                        }
                    }
                    yield Token::Finish(map_finish_reason(&reason));
                }

                if let Some(usage) = chunk.usage {
                    yield Token::Usage(usage.into());
                }
            }
        };

        Box::pin(stream)
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatAdapter {
    async fn send(&self, payload: RequestPayload) -> Result<ProviderTurn, ProviderError> {
        let request_body = self.build_request(&payload);
        let response = self.post_request(&request_body).await?;
        let chat_response: ChatResponse = response.json_logged().await?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".into()))?;

        let mut turn = ProviderTurn {
            usage: chat_response.usage.map(Into::into),
            finish: choice.finish_reason.as_deref().map(map_finish_reason),
            ..Default::default()
        };

        if let Some(content) = choice.message.content {
            if !content.is_empty() {
                turn.parts.push(Part::Text { text: content });
            }
        }
        for tc in choice.message.tool_calls.unwrap_or_default() {
            turn.tool_calls.push(ToolCall {
                id: ToolCallId(tc.id),
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            });
        }

        Ok(turn)
    }

    fn ordered_tool_results(&self) -> bool {
        self.ordered_tool_results
    }
}

#[async_trait]
impl StreamingChatProvider for OpenAiChatAdapter {
    async fn stream(
        &self,
        payload: RequestPayload,
    ) -> Result<BoxStream<'static, Result<Token, ProviderError>>, ProviderError> {
        let mut request_body = self.build_request(&payload);
        request_body.stream = Some(true);
        request_body.stream_options = Some(StreamOptions {
            include_usage: true,
        });

        let response = self.post_request(&request_body).await?;
        Ok(Self::process_stream(response))
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::OutputTokens,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PendingToolCall {
    fn into_tool_call(self) -> Option<ToolCall> {
        let name = self.name?;
        Some(ToolCall {
            id: self.id.map(ToolCallId).unwrap_or_default(),
            name,
            arguments: serde_json::from_str(&self.arguments)
                .unwrap_or(Value::Object(Default::default())),
        })
    }
}

// --- Wire format ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Translate one conversation item to the wire format. Audio events
    /// contribute their transcript; items with nothing to send map to None.
    fn from_item(item: &Item) -> Option<Self> {
        match item {
            Item::Message(msg) => {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let text = msg.text();
                Some(Self {
                    role: role.to_string(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: None,
                    tool_call_id: None,
                })
            }
            Item::ToolCall(call) => Some(Self {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(vec![ChatToolCall {
                    id: call.id.to_string(),
                    tool_type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                }]),
                tool_call_id: None,
            }),
            Item::ToolOutput(output) => {
                let content = match &output.result {
                    crate::model::ToolResult::Success { value } => value.to_string(),
                    crate::model::ToolResult::Error { message } => {
                        serde_json::json!({ "error": message }).to_string()
                    }
                };
                Some(Self {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(output.call_id.to_string()),
                })
            }
            Item::AudioEvent(event) => event.transcript.as_ref().map(|t| Self {
                role: "user".to_string(),
                content: Some(t.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        Usage {
            prompt_tokens: Some(u.prompt_tokens),
            completion_tokens: Some(u.completion_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: Option<ChatStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<ChatStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatError,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}
