//! Page-side dispatcher.
//!
//! Runs inside the page for the lifetime of one page session. It answers
//! `mcp:tool-call` frames by running the matching [`PageTool`] and settles
//! its own server-method calls when `mcp:tool-server-result` frames arrive.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;

use crate::channel::{Channel, FrameReceiver};
use crate::envelope::{Envelope, Frame, Topic};
use crate::error::{Error, Result};
use crate::registry::CallRegistry;
use crate::tools::{PageTool, ToolContext};

#[cfg(feature = "page-client")]
pub mod client;
mod component;
mod proxy;

pub use component::{element_name, ComponentRegistry};
pub use proxy::{ServerMethodStub, ServerProxy};

/// Dispatches tool calls to page handlers. Cheap to clone.
#[derive(Clone)]
pub struct PageDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    tools: HashMap<String, Arc<dyn PageTool>>,
    components: ComponentRegistry,
    registry: Arc<CallRegistry>,
    channel: Arc<dyn Channel>,
    call_timeout: Option<Duration>,
}

impl PageDispatcher {
    /// Wire up the page and announce `mcp:bridge-ready`.
    pub fn activate(
        channel: Arc<dyn Channel>,
        tools: impl IntoIterator<Item = Arc<dyn PageTool>>,
    ) -> Result<Self> {
        Self::activate_with_timeout(channel, tools, None)
    }

    /// As [`PageDispatcher::activate`], bounding each server-method call.
    pub fn activate_with_timeout(
        channel: Arc<dyn Channel>,
        tools: impl IntoIterator<Item = Arc<dyn PageTool>>,
        call_timeout: Option<Duration>,
    ) -> Result<Self> {
        let components = ComponentRegistry::new();
        let mut by_name = HashMap::new();
        for tool in tools {
            let name = tool.name().to_owned();
            if by_name.contains_key(&name) {
                return Err(Error::InvalidParams(format!("duplicate tool name: {name}")));
            }
            if let Some(component) = tool.component() {
                components.define(element_name(&name), component)?;
            }
            by_name.insert(name, tool);
        }

        let dispatcher = Self {
            inner: Arc::new(Inner {
                tools: by_name,
                components,
                registry: Arc::new(CallRegistry::new("page")),
                channel,
                call_timeout,
            }),
        };

        dispatcher.inner.channel.send(Topic::BridgeReady, None)?;
        tracing::info!(tools = dispatcher.inner.tools.len(), "MCP bridge ready");
        Ok(dispatcher)
    }

    /// Components mounted in this page.
    pub fn components(&self) -> &ComponentRegistry {
        &self.inner.components
    }

    /// Server-method calls still awaiting a result.
    pub fn pending_server_calls(&self) -> usize {
        self.inner.registry.len()
    }

    /// Route one inbound frame. Never fails; problems are logged or
    /// reported back as error envelopes.
    pub fn handle_frame(&self, frame: Frame) {
        let Some(topic) = frame.topic() else {
            tracing::debug!(event = %frame.event, "ignoring unknown event");
            return;
        };
        let Some(envelope) = frame.data else {
            if topic != Topic::BridgeReady {
                tracing::warn!(%topic, "frame without envelope");
            }
            return;
        };

        match topic {
            Topic::ToolCall => self.handle_tool_call(envelope),
            Topic::ToolServerResult => {
                self.inner.registry.settle(&envelope.id, envelope.outcome());
            }
            other => tracing::debug!(topic = %other, "ignoring frame addressed to the server"),
        }
    }

    /// Handle frames until the channel closes.
    pub async fn run(&self, mut frames: FrameReceiver) {
        while let Some(frame) = frames.recv().await {
            self.handle_frame(frame);
        }
        tracing::debug!("page channel closed");
    }

    fn handle_tool_call(&self, envelope: Envelope) {
        let Envelope { id, name, params, .. } = envelope;
        let name = name.unwrap_or_default();

        let Some(tool) = self.inner.tools.get(&name).cloned() else {
            let err = Error::ToolNotFound(name);
            tracing::error!("Error calling tool: {}", err);
            self.reply(id, Err(err.to_string()));
            return;
        };

        let component = self.inner.components.query(&element_name(&name));
        let server = ServerProxy::new(
            Arc::from(name.as_str()),
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.channel),
            self.inner.call_timeout,
        );
        let ctx = ToolContext::new(component, server);
        let params = params.unwrap_or(Value::Null);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(tool.call(ctx, params))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::HandlerFailure(format!("tool {name} panicked"))));

            let outcome = outcome.map_err(|e| {
                tracing::error!(tool = %name, "Error calling tool: {}", e);
                e.to_string()
            });
            dispatcher.reply(id, outcome);
        });
    }

    fn reply(&self, id: String, outcome: std::result::Result<Value, String>) {
        if let Err(e) = self
            .inner
            .channel
            .send(Topic::ToolResult, Some(Envelope::response(id, outcome)))
        {
            tracing::warn!("dropping tool result: {}", e);
        }
    }
}

impl std::fmt::Debug for PageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&str> = self.inner.tools.keys().map(String::as_str).collect();
        tools.sort_unstable();
        f.debug_struct("PageDispatcher")
            .field("tools", &tools)
            .field("components", &self.inner.components)
            .field("pending_server_calls", &self.inner.registry.len())
            .finish()
    }
}
