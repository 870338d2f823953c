//! Tool executor registry.
//!
//! Tool registration is process-wide bookkeeping: a name, a description, a
//! parameter schema, and one of a closed set of executor kinds. All
//! executors normalize to the same `(arguments) -> value | error` shape;
//! side effects belong to the executor, never to the registry. Dispatch is
//! read-shared; registration and removal are infrequent administrative
//! writes.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::McpServer;
use crate::model::{ToolCall, ToolOutput};
use crate::provider::ToolSpec;

/// Error type for tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution timed out")]
    Timeout,

    #[error("tool execution cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Boxed async function backing a [`Executor::Local`] tool.
pub type LocalFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// The closed set of executor kinds. Resolved once at registration time;
/// dispatch never inspects types at runtime beyond this tag.
#[derive(Clone)]
pub enum Executor {
    /// In-process async function.
    Local(LocalFn),
    /// External command. Arguments are passed as a JSON string appended to
    /// `args` when `pass_arguments` is set; stdout becomes the result.
    Shell {
        program: String,
        args: Vec<String>,
        pass_arguments: bool,
    },
    /// Executed server-side by the provider; never dispatched locally.
    Hosted,
    /// Backed by an MCP server. Approval gating happens in the session
    /// controller before dispatch reaches the registry.
    Mcp {
        server: Arc<dyn McpServer>,
        requires_approval: bool,
    },
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Local(_) => f.write_str("Executor::Local"),
            Executor::Shell { program, .. } => write!(f, "Executor::Shell({program})"),
            Executor::Hosted => f.write_str("Executor::Hosted"),
            Executor::Mcp {
                requires_approval, ..
            } => write!(f, "Executor::Mcp(approval: {requires_approval})"),
        }
    }
}

/// A registered tool: spec plus executor.
#[derive(Debug, Clone)]
pub struct ToolRegistration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
    pub executor: Executor,
}

impl ToolRegistration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: Executor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            executor,
        }
    }

    /// Convenience constructor for local async-closure tools.
    pub fn local<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync + 'static,
    {
        Self::new(name, description, parameters, Executor::Local(Arc::new(f)))
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        )
    }

    /// Whether this tool's dispatch must pass the MCP approval gate.
    pub fn requires_approval(&self) -> bool {
        matches!(
            self.executor,
            Executor::Mcp {
                requires_approval: true,
                ..
            }
        )
    }
}

/// Process-wide tool registry.
///
/// Mutable at runtime; concurrent dispatch is safe while registration is
/// expected to be an infrequent administrative operation.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolRegistration>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: ToolRegistration) {
        debug!("Registering tool: {}", registration.name);
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(registration.name.clone(), registration);
    }

    pub fn unregister(&self, name: &str) -> bool {
        debug!("Unregistering tool: {name}");
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ToolRegistration> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Tool specs advertised to the provider, sorted by name for a stable
    /// request fingerprint.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(ToolRegistration::spec)
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute one tool call, absorbing failures and timeouts into an
    /// error [`ToolOutput`]. Returns `None` when no executor is registered
    /// under the requested name; the caller applies the unhandled-tool
    /// policy.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<ToolOutput> {
        let registration = self.get(&call.name)?;
        info!("Tool call dispatched: {}", call.name);
        debug!("Tool arguments: {}", call.arguments);

        let run = Self::execute(&registration.executor, &call.name, call.arguments.clone());
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            outcome = tokio::time::timeout(timeout, run) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout),
            },
        };

        Some(match result {
            Ok(value) => {
                info!("Tool {} executed successfully", call.name);
                debug!("Tool result: {}", value);
                ToolOutput::success(call, value)
            }
            Err(e) => {
                warn!("Tool {} execution failed: {}", call.name, e);
                ToolOutput::error(call, e.to_string())
            }
        })
    }

    async fn execute(executor: &Executor, name: &str, arguments: Value) -> Result<Value, ToolError> {
        match executor {
            Executor::Local(f) => f(arguments).await,
            Executor::Shell {
                program,
                args,
                pass_arguments,
            } => {
                let mut command = tokio::process::Command::new(program);
                command.args(args);
                if *pass_arguments {
                    command.arg(arguments.to_string());
                }
                let output = command.output().await?;
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    Err(ToolError::Execution(format!(
                        "{program} exited with {}: {stderr}",
                        output.status
                    )))
                }
            }
            Executor::Hosted => Err(ToolError::Execution(
                "hosted tool is executed by the provider".to_string(),
            )),
            Executor::Mcp { server, .. } => server
                .call_tool(name, arguments)
                .await
                .map_err(|e| ToolError::Execution(e.to_string())),
        }
    }
}
