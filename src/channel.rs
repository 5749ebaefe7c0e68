//! Message channel between the dev server and the page.
//!
//! The transport underneath (a websocket in production, an in-process queue
//! in tests) delivers each frame at most once while connected and nothing
//! after disconnect. The bridge adds no queueing of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::envelope::{Envelope, Frame, Topic};
use crate::error::{Error, Result};
use crate::registry::CallRegistry;

/// Outbound half of a connection.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Inbound half of a connection.
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Something that can emit named events to the other side.
pub trait Channel: Send + Sync {
    /// Send `envelope` under `topic`.
    fn send(&self, topic: Topic, envelope: Option<Envelope>) -> Result<()>;
}

/// Identifies one page connection so a stale disconnect cannot detach a
/// newer page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// The server's handle on the page: zero or one live connection.
#[derive(Debug, Default)]
pub struct PageConnection {
    current: RwLock<Option<(ConnectionId, FrameSender)>>,
    next_id: AtomicU64,
}

impl PageConnection {
    /// No page attached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new page, replacing any previous one, and return the queue
    /// of frames to write to it.
    pub fn attach(&self) -> (ConnectionId, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, tx));

        if let Some((old, _)) = previous {
            tracing::info!(old = old.0, new = id.0, "page connection replaced");
        } else {
            tracing::info!(connection = id.0, "page connected");
        }
        (id, rx)
    }

    /// Detach `id` if it is still the current page.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some((live, _)) if *live == id => {
                *current = None;
                tracing::info!(connection = id.0, "page disconnected");
                true
            }
            _ => false,
        }
    }

    /// Whether a page is attached.
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Channel for PageConnection {
    fn send(&self, topic: Topic, envelope: Option<Envelope>) -> Result<()> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        let (_, tx) = current
            .as_ref()
            .ok_or_else(|| Error::ChannelUnavailable("no page connected".into()))?;
        tx.send(Frame::new(topic, envelope))
            .map_err(|_| Error::ChannelUnavailable("page connection closed".into()))
    }
}

/// A one-directional in-process link to a single peer.
#[derive(Debug, Clone)]
pub struct FrameLink {
    tx: FrameSender,
}

/// Create a link and the receiver its frames arrive on.
pub fn link() -> (FrameLink, FrameReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameLink { tx }, rx)
}

impl Channel for FrameLink {
    fn send(&self, topic: Topic, envelope: Option<Envelope>) -> Result<()> {
        self.tx
            .send(Frame::new(topic, envelope))
            .map_err(|_| Error::ChannelUnavailable("peer dropped".into()))
    }
}

/// Register a call, send its request and wait for the matching result.
///
/// If the request cannot be sent the call is withdrawn immediately. With a
/// `timeout` the call is withdrawn when it expires; without one it waits for
/// as long as the caller keeps the future alive.
pub async fn round_trip(
    registry: &CallRegistry,
    channel: &dyn Channel,
    topic: Topic,
    name: String,
    params: Option<Value>,
    timeout: Option<Duration>,
) -> Result<Value> {
    let (id, pending) = registry.begin_call();
    if let Err(e) = channel.send(topic, Some(Envelope::request(id.clone(), name, params))) {
        registry.cancel(&id);
        return Err(e);
    }

    let Some(limit) = timeout else {
        return pending.await;
    };
    match tokio::time::timeout(limit, pending).await {
        Ok(outcome) => outcome,
        Err(_) => {
            registry.cancel(&id);
            Err(Error::Timeout {
                id,
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }
}
