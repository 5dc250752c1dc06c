//! Identifier-keyed rendezvous between request senders and the read loop.
//!
//! Each outstanding request owns a single-assignment slot. The read loop
//! delivers at most one payload into it; the caller either receives that
//! payload or gives up and calls [`Correlator::cleanup`].

use crate::core::errors::EngineError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::trace;

/// Request identifier. Venues use integers; string ids are accepted for
/// protocols that correlate on signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(u64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Num(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

struct PendingRequest<T> {
    slot: oneshot::Sender<T>,
    registration: u64,
    created_at: Instant,
}

/// Handle returned by [`Correlator::register`].
pub struct Waiter<T> {
    id: RequestId,
    registration: u64,
    rx: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Resolves with the delivered payload. Fails once the slot is released
    /// without a delivery (cleanup or connection close).
    pub async fn recv(&mut self) -> Result<T, EngineError> {
        (&mut self.rx).await.map_err(|_| {
            EngineError::Transport(format!(
                "response slot for request {} closed before delivery",
                self.id
            ))
        })
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

pub struct Correlator<T> {
    pending: Arc<DashMap<RequestId, PendingRequest<T>>>,
    registrations: Arc<AtomicU64>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            registrations: Arc::clone(&self.registrations),
        }
    }
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Correlator<T> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            registrations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn register(&self, id: impl Into<RequestId>) -> Result<Waiter<T>, EngineError> {
        let id = id.into();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateIdentifier(id)),
            Entry::Vacant(vacant) => {
                let (slot, rx) = oneshot::channel();
                let registration = self.registrations.fetch_add(1, Ordering::Relaxed);
                vacant.insert(PendingRequest {
                    slot,
                    registration,
                    created_at: Instant::now(),
                });
                Ok(Waiter {
                    id,
                    registration,
                    rx,
                })
            }
        }
    }

    /// Hands `payload` to the waiter registered under `id`. Returns `false`
    /// when nobody is waiting, including a waiter that already went away.
    pub fn deliver(&self, id: &RequestId, payload: T) -> bool {
        self.pending.remove(id).is_some_and(|(_, pending)| {
            trace!(%id, elapsed = ?pending.created_at.elapsed(), "delivering response");
            pending.slot.send(payload).is_ok()
        })
    }

    /// Releases a registration that will not be delivered to. Idempotent,
    /// and never touches a newer registration that reused the identifier.
    pub fn cleanup(&self, waiter: &Waiter<T>) {
        self.pending
            .remove_if(&waiter.id, |_, pending| pending.registration == waiter.registration);
    }

    /// Drops every slot; their waiters fail instead of running into timeouts.
    pub fn close_all(&self) {
        self.pending.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_outstanding(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }
}
