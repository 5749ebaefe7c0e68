//! MCP protocol server.
//!
//! One instance serves exactly one HTTP request and is then dropped, so no
//! protocol state leaks between requests. Everything long-lived sits in the
//! shared [`ServerDispatcher`].

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::dispatcher::ServerDispatcher;
use crate::error::{codes, Error};
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpMessage, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability,
};

/// Protocol version offered when the client asks for one we do not know.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions this server speaks.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Stateless MCP server bound to the shared dispatcher.
pub struct McpServer {
    dispatcher: Arc<ServerDispatcher>,
    info: ServerInfo,
    client_info: RwLock<Option<ClientInfo>>,
}

impl McpServer {
    /// Create a server for one request.
    pub fn new(dispatcher: Arc<ServerDispatcher>, info: ServerInfo) -> Self {
        Self {
            dispatcher,
            info,
            client_info: RwLock::new(None),
        }
    }

    /// Client that called `initialize` on this instance, if any.
    pub async fn client_info(&self) -> Option<ClientInfo> {
        self.client_info.read().await.clone()
    }

    /// Handle a raw JSON message.
    pub async fn handle_json(&self, json: &str) -> Option<JsonRpcResponse> {
        match McpMessage::parse(json) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(JsonRpcResponse::error(None, codes::PARSE_ERROR, e.to_string())),
        }
    }

    /// Handle a parsed message; notifications and responses yield nothing.
    pub async fn handle_message(&self, message: McpMessage) -> Option<JsonRpcResponse> {
        match message {
            McpMessage::Request(request) => Some(self.handle_request(request).await),
            McpMessage::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            McpMessage::Response(_) => None,
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params).await,
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => JsonRpcResponse::success(id, json!({})),
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => tracing::debug!("client initialized"),
            "notifications/cancelled" => {
                tracing::debug!("request cancelled by client; page-side work continues")
            }
            other => tracing::debug!("Unknown notification: {}", other),
        }
    }

    async fn handle_initialize(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: InitializeParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid initialize params: {}", e),
                );
            }
            None => {
                return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "initialize params required");
            }
        };

        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_owned()
        };
        tracing::debug!(
            client = %params.client_info.name,
            version = %protocol_version,
            "initialize"
        );
        *self.client_info.write().await = Some(params.client_info);

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: self.info.clone(),
        };

        JsonRpcResponse::success(id, result)
    }

    fn handle_tools_list(&self, id: Option<JsonRpcId>) -> JsonRpcResponse {
        let tools = self.dispatcher.tools().definitions();
        JsonRpcResponse::success(id, ListToolsResult { tools })
    }

    async fn handle_tools_call(
        &self,
        id: Option<JsonRpcId>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid tool call params: {}", e),
                );
            }
            None => {
                return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "tool call params required");
            }
        };

        match self.call_tool(params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((name, e)) => {
                tracing::error!("Tool {} failed: {}", name, e);
                JsonRpcResponse::success(id, ToolCallResult::error(e.to_string()))
            }
        }
    }

    /// Validate, forward to the page and check the result. Every failure
    /// comes back as the tool name plus the error.
    async fn call_tool(&self, params: ToolCallParams) -> Result<Value, (String, Error)> {
        let ToolCallParams { name, arguments } = params;
        let Some(tool) = self.dispatcher.tools().get(&name).cloned() else {
            return Err((name.clone(), Error::ToolNotFound(name)));
        };

        let empty = json!({});
        tool.validate_input(arguments.as_ref().unwrap_or(&empty))
            .map_err(|e| (name.clone(), e))?;

        let result = self
            .dispatcher
            .dispatch_tool_call(&name, arguments)
            .await
            .map_err(|e| (name.clone(), e))?;
        let result = if result.is_null() {
            json!({ "content": [] })
        } else {
            result
        };

        tool.validate_output(&result).map_err(|e| (name, e))?;
        Ok(result)
    }
}
