//! Correlated-call registry.
//!
//! Both ends of the bridge keep one of these: the server for tool calls sent
//! to the page, the page for server-method calls sent back to the server.
//! A call is registered before its request leaves, and removed the moment it
//! is settled, so an id is never settled twice.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// What a counterparty reported: a value, or an error message.
pub type Outcome = std::result::Result<Value, String>;

/// Map from call id to the sender half of its pending result.
pub struct CallRegistry {
    label: &'static str,
    pending: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

impl CallRegistry {
    /// Create an empty registry. `label` only appears in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new pending call and return its id and awaitable.
    pub fn begin_call(&self) -> (String, PendingCall) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        let id = loop {
            let candidate = new_call_id();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.insert(id.clone(), tx);
        drop(pending);

        tracing::trace!(registry = self.label, id = %id, "call registered");
        (id.clone(), PendingCall { id, rx })
    }

    /// Settle the call registered under `id`.
    ///
    /// Unknown ids are logged and ignored: late or duplicate results (for
    /// example after a page reload orphaned the original call) are expected.
    /// Returns whether a pending call was settled.
    pub fn settle(&self, id: &str, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            tracing::info!(registry = self.label, "Ignoring tool result for invocation {}", id);
            return false;
        };

        if tx.send(outcome).is_err() {
            tracing::debug!(registry = self.label, id, "caller stopped waiting before settlement");
        }
        true
    }

    /// Drop a pending call without settling it. The awaitable then resolves
    /// to [`Error::CallAbandoned`].
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Whether `id` is still awaiting settlement.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of calls awaiting settlement.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("label", &self.label)
            .field("pending", &self.len())
            .finish()
    }
}

/// Timestamp plus a random suffix.
fn new_call_id() -> String {
    format!(
        "{}{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Awaitable side of a registered call.
#[derive(Debug)]
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    /// The correlation id this call was registered under.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::CallRejected(message)),
            Err(_) => Err(Error::CallAbandoned(self.id.clone())),
        })
    }
}
