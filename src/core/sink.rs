use crate::core::types::StreamEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound event channel shared by the read loop and channel handlers.
///
/// Emitting never waits: a bounded sink that is full drops the event with a
/// warning so frame ingestion keeps going.
#[derive(Debug, Clone)]
pub struct EventSink {
    inner: SinkInner,
}

#[derive(Debug, Clone)]
enum SinkInner {
    Bounded(mpsc::Sender<StreamEvent>),
    Unbounded(mpsc::UnboundedSender<StreamEvent>),
}

/// Consumer end of an [`EventSink`].
#[derive(Debug)]
pub enum EventReceiver {
    Bounded(mpsc::Receiver<StreamEvent>),
    Unbounded(mpsc::UnboundedReceiver<StreamEvent>),
}

impl EventSink {
    /// `Some(n)` builds a bounded sink of capacity `n`, `None` an unbounded one.
    pub fn channel(capacity: Option<usize>) -> (Self, EventReceiver) {
        match capacity {
            Some(n) => {
                let (tx, rx) = mpsc::channel(n.max(1));
                (
                    Self {
                        inner: SinkInner::Bounded(tx),
                    },
                    EventReceiver::Bounded(rx),
                )
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (
                    Self {
                        inner: SinkInner::Unbounded(tx),
                    },
                    EventReceiver::Unbounded(rx),
                )
            }
        }
    }

    /// Returns false when the event could not be queued.
    pub fn emit(&self, event: StreamEvent) -> bool {
        match &self.inner {
            SinkInner::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(?event, "event sink full, dropping event");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("event receiver dropped");
                    false
                }
            },
            SinkInner::Unbounded(tx) => tx.send(event).is_ok(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SinkInner::Bounded(tx) => tx.is_closed(),
            SinkInner::Unbounded(tx) => tx.is_closed(),
        }
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}
