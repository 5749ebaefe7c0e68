//! Calls from a page handler back into the dev server.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::channel::{round_trip, Channel};
use crate::envelope::Topic;
use crate::error::Result;
use crate::registry::CallRegistry;

/// Server-method proxy bound to one tool's namespace.
///
/// `proxy.call("saveScreenshot", params)` becomes a `mcp:tool-server-call`
/// named `<tool>:saveScreenshot` and resolves when the matching
/// `mcp:tool-server-result` arrives.
#[derive(Clone)]
pub struct ServerProxy {
    tool_name: Arc<str>,
    registry: Arc<CallRegistry>,
    channel: Arc<dyn Channel>,
    timeout: Option<Duration>,
}

impl ServerProxy {
    pub(crate) fn new(
        tool_name: Arc<str>,
        registry: Arc<CallRegistry>,
        channel: Arc<dyn Channel>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            tool_name,
            registry,
            channel,
            timeout,
        }
    }

    /// The tool this proxy routes for.
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// A stub bound to one method.
    pub fn method(&self, method: &str) -> ServerMethodStub {
        ServerMethodStub {
            proxy: self.clone(),
            qualified: format!("{}:{}", self.tool_name, method),
        }
    }

    /// Invoke `method` on the server with raw JSON params.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.method(method).call(params).await
    }

    /// Invoke `method` with typed params and decode the result.
    pub async fn call_as<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for ServerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProxy")
            .field("tool_name", &self.tool_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One server method, pre-bound to its `tool:method` name.
#[derive(Debug, Clone)]
pub struct ServerMethodStub {
    proxy: ServerProxy,
    qualified: String,
}

impl ServerMethodStub {
    /// The routed name, `tool:method`.
    pub fn name(&self) -> &str {
        &self.qualified
    }

    /// Perform the round trip.
    pub async fn call(&self, params: Value) -> Result<Value> {
        let params = (!params.is_null()).then_some(params);
        tracing::debug!(method = %self.qualified, "calling server method");
        round_trip(
            &self.proxy.registry,
            self.proxy.channel.as_ref(),
            Topic::ToolServerCall,
            self.qualified.clone(),
            params,
            self.proxy.timeout,
        )
        .await
    }
}
