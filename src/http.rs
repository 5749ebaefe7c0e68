//! HTTP surface: the MCP endpoint and the page websocket.

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::channel::{Channel, PageConnection};
use crate::config::BridgeConfig;
use crate::dispatcher::ServerDispatcher;
use crate::envelope::Frame;
use crate::error::{codes, Error, Result};
use crate::protocol::{JsonRpcResponse, McpPayload, ServerInfo};
use crate::server::McpServer;
use crate::tools::ToolSet;

/// Headers every endpoint response carries.
const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, DELETE, OPTIONS"),
    (
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Accept, Mcp-Session-Id, Last-Event-ID, Authorization",
    ),
    (header::ACCESS_CONTROL_EXPOSE_HEADERS, "Mcp-Session-Id"),
];

/// Shared state behind every route.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<ServerDispatcher>,
    page: Arc<PageConnection>,
    info: ServerInfo,
}

/// The dev-server half of the bridge: one page connection, one dispatcher.
pub struct BridgeServer {
    config: BridgeConfig,
    dispatcher: Arc<ServerDispatcher>,
    page: Arc<PageConnection>,
}

impl BridgeServer {
    /// Assemble the server for `tools`. Fails when the configured paths
    /// cannot be routed.
    pub fn new(config: BridgeConfig, tools: ToolSet) -> Result<Self> {
        config.validate()?;
        let page = Arc::new(PageConnection::new());
        let channel: Arc<dyn Channel> = page.clone();
        let dispatcher = Arc::new(
            ServerDispatcher::new(tools, channel).with_call_timeout(config.call_timeout()),
        );
        Ok(Self {
            config,
            dispatcher,
            page,
        })
    }

    /// Shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<ServerDispatcher> {
        &self.dispatcher
    }

    /// Page connection slot.
    pub fn page(&self) -> &Arc<PageConnection> {
        &self.page
    }

    /// Build the router serving the MCP endpoint and the page websocket.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            page: Arc::clone(&self.page),
            info: ServerInfo {
                name: self.config.name.clone(),
                version: self.config.version.clone(),
            },
        };

        let routes = Router::new()
            .route(&self.config.endpoint, any(mcp_endpoint))
            .route(&self.config.bridge_path, get(page_socket))
            .with_state(state);
        with_bridge_layers(routes)
    }

    /// Bind and serve until the process stops.
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            "MCP Server plugin loaded - endpoint available at http://{}{}",
            addr,
            self.config.endpoint
        );
        tracing::info!("Server: {} v{}", self.config.name, self.config.version);
        tracing::info!("Pages connect at ws://{}{}", addr, self.config.bridge_path);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Tracing, CORS headers on every response, and the 500 envelope for panics.
fn with_bridge_layers(router: Router) -> Router {
    let [allow_origin, allow_methods, allow_headers, expose_headers] = CORS_HEADERS
        .map(|(name, value)| SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value)));

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(allow_origin)
            .layer(allow_methods)
            .layer(allow_headers)
            .layer(expose_headers)
            .layer(CatchPanicLayer::custom(panic_response)),
    )
}

async fn mcp_endpoint(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::POST => handle_post(&state, &headers, &body)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("MCP request error: {}", e);
                internal_error(e.to_string())
            }),
        Method::DELETE => StatusCode::OK.into_response(),
        _ => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST, DELETE, OPTIONS")],
            Json(JsonRpcResponse::error(None, -32000, "Method not allowed.")),
        )
            .into_response(),
    }
}

/// Serve one POST with a fresh protocol server.
async fn handle_post(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<Response> {
    let Some(body) = parse_body(body) else {
        return Ok(bad_request(codes::PARSE_ERROR, "Parse error: Invalid JSON".into()));
    };
    let payload = match McpPayload::from_value(body) {
        Ok(payload) => payload,
        Err(e) => return Ok(bad_request(codes::INVALID_REQUEST, format!("Invalid Request: {e}"))),
    };

    let server = McpServer::new(Arc::clone(&state.dispatcher), state.info.clone());
    let (responses, batch) = match payload {
        McpPayload::Single(message) => (server.handle_message(message).await.into_iter().collect(), false),
        McpPayload::Batch(messages) => {
            let handled =
                futures::future::join_all(messages.into_iter().map(|m| server.handle_message(m))).await;
            (handled.into_iter().flatten().collect::<Vec<_>>(), true)
        }
    };

    if responses.is_empty() {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    if accepts_event_stream(headers) {
        let events = responses
            .into_iter()
            .map(|response| Event::default().event("message").json_data(response))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Internal(e.to_string()))?;
        let stream = stream::iter(events.into_iter().map(Ok::<_, Infallible>));
        return Ok(([(header::CACHE_CONTROL, "no-cache")], Sse::new(stream)).into_response());
    }

    let body: Value = if batch {
        serde_json::to_value(&responses)?
    } else {
        match responses.into_iter().next() {
            Some(response) => serde_json::to_value(response)?,
            None => return Ok(StatusCode::ACCEPTED.into_response()),
        }
    };
    Ok(Json(body).into_response())
}

/// An unreadable body counts as no body at all.
fn parse_body(body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                raw = %String::from_utf8_lossy(body),
                "Failed to parse JSON body: {}",
                e
            );
            None
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

fn bad_request(code: i32, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(None, code, message)),
    )
        .into_response()
}

/// The 500 envelope for anything that escaped request handling.
fn internal_error(detail: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(JsonRpcResponse::error_with_data(
            None,
            codes::INTERNAL_ERROR,
            "Internal server error",
            json!(detail),
        )),
    )
        .into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_owned()))
        .unwrap_or_else(|| "handler panicked".to_owned());
    tracing::error!("MCP request error: {}", detail);
    internal_error(detail)
}

async fn page_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| page_session(socket, state))
}

/// Pump frames between one page websocket and the dispatcher.
async fn page_session(socket: WebSocket, state: AppState) {
    let (connection, mut outbound) = state.page.attach();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            let text = match frame.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("dropping unencodable frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => match Frame::from_text(&text) {
                    Ok(frame) => state.dispatcher.handle_frame(frame),
                    Err(e) => tracing::warn!("discarding malformed frame: {}", e),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    state.page.detach(connection);
    tracing::debug!(
        pending = state.dispatcher.pending_calls(),
        "page session ended"
    );
}
