//! MCP integration: server bridge and tool-call approval flow.
//!
//! An MCP-backed tool may require user approval before execution. The
//! approval wait is driven by the session controller: it races the
//! handler's answer against the configured approval timeout and the turn's
//! cancellation token. A timeout counts as denial, never as an error.

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService};
use rmcp::ClientHandler;
use serde_json::{json, Value};
use std::ops::Deref;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::ToolCall;
use crate::provider::ToolSpec;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP error: {0}")]
    Mcp(String),
}

/// Tool surface of an MCP server, trimmed to what the agent dispatches.
#[async_trait]
pub trait McpServer: Send + Sync {
    /// List tools exposed by the server.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError>;

    /// Execute a tool and return its structured result.
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError>;
}

#[async_trait]
impl<S: ClientHandler + Send + Sync> McpServer for RunningService<RoleClient, S> {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let result = self
            .deref()
            .list_tools(None)
            .await
            .map_err(|e| McpError::Mcp(e.to_string()))?;

        Ok(result
            .tools
            .into_iter()
            .map(|t| {
                ToolSpec::new(
                    t.name.to_string(),
                    t.description
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    Value::Object((*t.input_schema).clone()),
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: args.as_object().cloned(),
        };

        let result = self
            .deref()
            .call_tool(params)
            .await
            .map_err(|e| McpError::Mcp(e.to_string()))?;

        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }

        let mut texts = Vec::new();
        for content in result.content {
            if let rmcp::model::RawContent::Text(text_content) = content.raw {
                if let Ok(parsed) = serde_json::from_str::<Value>(&text_content.text) {
                    return Ok(parsed);
                }
                texts.push(text_content.text);
            }
        }
        Ok(json!({ "response": texts }))
    }
}

/// Outcome of an approval wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    /// No answer within the approval timeout; treated as denial.
    TimedOut,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

/// Answers approval requests for MCP tool calls, typically by asking the
/// user. Implementations may take arbitrarily long; the session bounds the
/// wait.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve(&self, call: &ToolCall) -> bool;
}

/// Approves every request. Suitable for trusted tool sets and tests.
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn approve(&self, _call: &ToolCall) -> bool {
        true
    }
}

/// Denies every request.
pub struct AutoDeny;

#[async_trait]
impl ApprovalHandler for AutoDeny {
    async fn approve(&self, _call: &ToolCall) -> bool {
        false
    }
}

/// Race an approval handler against the timeout and cancellation.
pub async fn await_approval(
    handler: &dyn ApprovalHandler,
    call: &ToolCall,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ApprovalDecision {
    debug!("Awaiting approval for tool call: {}", call.name);

    tokio::select! {
        _ = cancel.cancelled() => ApprovalDecision::Denied,
        answer = tokio::time::timeout(timeout, handler.approve(call)) => match answer {
            Ok(true) => ApprovalDecision::Approved,
            Ok(false) => ApprovalDecision::Denied,
            Err(_) => {
                warn!("Approval for {} timed out, treating as denied", call.name);
                ApprovalDecision::TimedOut
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn auto_handlers_decide_immediately() {
        let call = ToolCall::new("deploy", json!({}));
        let cancel = CancellationToken::new();

        let approved =
            await_approval(&AutoApprove, &call, Duration::from_millis(50), &cancel).await;
        assert!(approved.is_approved());

        let denied = await_approval(&AutoDeny, &call, Duration::from_millis(50), &cancel).await;
        assert_eq!(denied, ApprovalDecision::Denied);
    }

    #[tokio::test]
    async fn slow_handler_times_out_as_denied() {
        struct Stalls;

        #[async_trait]
        impl ApprovalHandler for Stalls {
            async fn approve(&self, _call: &ToolCall) -> bool {
                tokio::time::sleep(Duration::from_secs(60)).await;
                true
            }
        }

        let call = ToolCall::new("deploy", json!({}));
        let decision = await_approval(
            &Stalls,
            &call,
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(decision, ApprovalDecision::TimedOut);
    }
}
