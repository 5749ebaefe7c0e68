//! Server-side dispatcher.
//!
//! Sends tool calls to the connected page and settles them when results come
//! back; runs tool server methods when the page calls back. One instance lives
//! for the whole dev-server process and is shared by every MCP request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;

use crate::channel::{round_trip, Channel};
use crate::envelope::{Envelope, Frame, Topic};
use crate::error::{Error, Result};
use crate::registry::CallRegistry;
use crate::tools::ToolSet;

/// Forwards tool calls to the page and serves its server-method calls.
pub struct ServerDispatcher {
    tools: ToolSet,
    registry: CallRegistry,
    channel: Arc<dyn Channel>,
    call_timeout: Option<Duration>,
}

impl ServerDispatcher {
    /// Create a dispatcher over `channel`.
    pub fn new(tools: ToolSet, channel: Arc<dyn Channel>) -> Self {
        Self {
            tools,
            registry: CallRegistry::new("server"),
            channel,
            call_timeout: None,
        }
    }

    /// Bound every tool call; `None` waits indefinitely.
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Registered tools.
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Tool calls still awaiting a page result.
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    /// Run `name` in the page and wait for its result.
    pub async fn dispatch_tool_call(&self, name: &str, params: Option<Value>) -> Result<Value> {
        tracing::debug!(tool = name, "dispatching tool call");
        round_trip(
            &self.registry,
            self.channel.as_ref(),
            Topic::ToolCall,
            name.to_owned(),
            params,
            self.call_timeout,
        )
        .await
    }

    /// Route one frame received from the page. Never fails.
    pub fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let Some(topic) = frame.topic() else {
            tracing::debug!(event = %frame.event, "ignoring unknown event");
            return;
        };

        match (topic, frame.data) {
            (Topic::BridgeReady, _) => tracing::info!("MCP bridge ready!"),
            (Topic::ToolResult, Some(envelope)) => {
                self.registry.settle(&envelope.id, envelope.outcome());
            }
            (Topic::ToolServerCall, Some(envelope)) => {
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move {
                    dispatcher.handle_server_call(envelope).await;
                });
            }
            (Topic::ToolResult | Topic::ToolServerCall, None) => {
                tracing::warn!(%topic, "frame without envelope");
            }
            (other, _) => tracing::debug!(topic = %other, "ignoring frame addressed to the page"),
        }
    }

    /// Execute a `tool:method` server call and send its result envelope.
    /// Failures, including panics, are reported as error envelopes.
    pub async fn handle_server_call(&self, envelope: Envelope) -> Envelope {
        let Envelope { id, name, params, .. } = envelope;
        let name = name.unwrap_or_default();

        let outcome = AssertUnwindSafe(self.run_server_method(&name, params.unwrap_or(Value::Null)))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::HandlerFailure(format!("server method {name} panicked"))))
            .map_err(|e| {
                tracing::error!(method = %name, "server method failed: {}", e);
                e.to_string()
            });

        let response = Envelope::response(id, outcome);
        if let Err(e) = self
            .channel
            .send(Topic::ToolServerResult, Some(response.clone()))
        {
            tracing::warn!("dropping server method result: {}", e);
        }
        response
    }

    async fn run_server_method(&self, qualified: &str, params: Value) -> Result<Value> {
        let (tool_name, method_name) = qualified.split_once(':').unwrap_or((qualified, ""));

        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| Error::ToolNotFound(tool_name.to_owned()))?;
        let method = tool
            .server_method(method_name)
            .ok_or_else(|| Error::MethodNotFound(method_name.to_owned()))?;

        tracing::info!(tool = tool_name, method = method_name, "calling server method");
        method.call(params).await
    }
}

impl std::fmt::Debug for ServerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDispatcher")
            .field("tools", &self.tools.len())
            .field("registry", &self.registry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
