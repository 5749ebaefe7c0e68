//! Native page runtime: hosts page tools over the dev server's websocket.
//!
//! Useful when the "page" is not a browser tab, e.g. a desktop app or game
//! loop that wants to expose in-process tools to an MCP client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::channel;
use crate::envelope::Frame;
use crate::error::{Error, Result};
use crate::page::PageDispatcher;
use crate::tools::PageTool;

/// Connect to `url` (e.g. `ws://127.0.0.1:3000/__mcp_bridge`), activate a
/// dispatcher for `tools` and serve until either side closes.
pub async fn run(
    url: &str,
    tools: Vec<Arc<dyn PageTool>>,
    call_timeout: Option<Duration>,
) -> Result<()> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::ChannelUnavailable(format!("connect {url}: {e}")))?;
    tracing::info!(url, "connected to dev server");

    let (mut ws_tx, mut ws_rx) = stream.split();
    let (link, mut outbound) = channel::link();
    let dispatcher = PageDispatcher::activate_with_timeout(Arc::new(link), tools, call_timeout)?;

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            ws_tx
                .send(WsMessage::Text(frame.to_text()?))
                .await
                .map_err(|e| Error::ChannelUnavailable(e.to_string()))?;
        }
        Ok::<(), Error>(())
    };

    let reader = async {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(WsMessage::Text(text)) => match Frame::from_text(&text) {
                    Ok(frame) => dispatcher.handle_frame(frame),
                    Err(e) => tracing::warn!("discarding malformed frame: {}", e),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::ChannelUnavailable(e.to_string())),
            }
        }
        Ok(())
    };

    let outcome = tokio::select! {
        result = writer => result,
        result = reader => result,
    };
    tracing::info!(
        abandoned = dispatcher.pending_server_calls(),
        "disconnected from dev server"
    );
    outcome
}
