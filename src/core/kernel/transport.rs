use crate::core::errors::EngineError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, warn};

/// Duplex byte-frame connection. Sending and receiving may happen from
/// different tasks at the same time; only the read loop calls `receive`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self) -> Result<(), EngineError>;

    async fn send(&self, frame: Vec<u8>) -> Result<(), EngineError>;

    /// Next data frame; `None` once the stream has ended.
    async fn receive(&self) -> Option<Result<Vec<u8>, EngineError>>;

    async fn close(&self) -> Result<(), EngineError>;

    fn is_connected(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub dial_count: AtomicU64,
}

/// Tungstenite-based websocket transport
pub struct TungsteniteTransport {
    url: String,
    venue: String,
    connect_timeout: Duration,
    write: Mutex<Option<SplitSink<WsStream, Message>>>,
    read: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
    stats: ConnectionStats,
}

impl TungsteniteTransport {
    pub fn new(url: String, venue: String) -> Self {
        Self {
            url,
            venue,
            connect_timeout: Duration::from_secs(10),
            write: Mutex::new(None),
            read: Mutex::new(None),
            connected: AtomicBool::new(false),
            stats: ConnectionStats::default(),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    async fn send_message(&self, msg: Message) -> Result<(), EngineError> {
        let mut guard = self.write.lock().await;
        let write = guard.as_mut().ok_or_else(|| {
            EngineError::Transport("WebSocket write stream not available".to_string())
        })?;

        write.send(msg).await.map_err(|e| {
            self.connected.store(false, Ordering::Release);
            EngineError::Transport(format!("Failed to send WebSocket message: {}", e))
        })
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    #[instrument(skip(self), fields(venue = %self.venue, url = %self.url))]
    async fn dial(&self) -> Result<(), EngineError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| EngineError::Transport("WebSocket connection timeout".to_string()))?
            .map_err(|e| EngineError::Transport(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        *self.read.lock().await = Some(read);
        self.connected.store(true, Ordering::Release);
        self.stats.dial_count.fetch_add(1, Ordering::Relaxed);
        debug!("websocket connected");
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::Transport("WebSocket not connected".to_string()));
        }

        let len = frame.len() as u64;
        let msg = match String::from_utf8(frame) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.send_message(msg).await?;

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    async fn receive(&self) -> Option<Result<Vec<u8>, EngineError>> {
        let mut guard = self.read.lock().await;
        let read = guard.as_mut()?;

        loop {
            let frame = match read.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Ping(data))) => {
                    // websocket-level pings are answered here, below the venue protocol
                    if let Err(e) = self.send_message(Message::Pong(data)).await {
                        warn!(venue = %self.venue, "Failed to send pong response: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(venue = %self.venue, ?frame, "websocket closed by peer");
                    self.connected.store(false, Ordering::Release);
                    return None;
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::Release);
                    return Some(Err(EngineError::Transport(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected.store(false, Ordering::Release);
                    return None;
                }
            };

            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_received
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            return Some(Ok(frame));
        }
    }

    #[instrument(skip(self), fields(venue = %self.venue))]
    async fn close(&self) -> Result<(), EngineError> {
        if let Some(write) = self.write.lock().await.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected.store(false, Ordering::Release);
        *self.write.lock().await = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// In-memory transport; the paired [`TransportPeer`] plays the venue.
pub struct ChannelTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connected: AtomicBool,
}

/// Venue side of a [`ChannelTransport`].
pub struct TransportPeer {
    to_client: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, TransportPeer) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Mutex::new(inbound),
                outbound,
                connected: AtomicBool::new(false),
            },
            TransportPeer {
                to_client: Some(to_client),
                from_client,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn dial(&self) -> Result<(), EngineError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::Transport("transport not connected".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| EngineError::Transport("peer went away".to_string()))
    }

    async fn receive(&self) -> Option<Result<Vec<u8>, EngineError>> {
        let frame = self.inbound.lock().await.recv().await;
        if frame.is_none() {
            self.connected.store(false, Ordering::Release);
        }
        frame.map(Ok)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl TransportPeer {
    /// Queue a raw frame for the client. Returns false after `hang_up`.
    pub fn push(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(frame.into()).is_ok())
    }

    pub fn push_json(&self, value: &Value) -> bool {
        self.push(value.to_string())
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn next_sent(&mut self) -> Option<Value> {
        let frame = self.from_client.recv().await?;
        serde_json::from_slice(&frame).ok()
    }

    pub fn try_next_sent(&mut self) -> Option<Value> {
        let frame = self.from_client.try_recv().ok()?;
        serde_json::from_slice(&frame).ok()
    }

    /// End the stream as seen by the client.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_transport_round_trip() {
        let (transport, mut peer) = ChannelTransport::pair();
        assert!(transport.send(b"early".to_vec()).await.is_err());

        transport.dial().await.unwrap();
        transport.send(br#"{"id":3}"#.to_vec()).await.unwrap();
        assert_eq!(peer.next_sent().await.unwrap(), json!({"id": 3}));

        assert!(peer.push_json(&json!({"method": "heartbeat"})));
        let frame = transport.receive().await.unwrap().unwrap();
        assert_eq!(frame, br#"{"method":"heartbeat"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_hang_up_ends_stream() {
        let (transport, mut peer) = ChannelTransport::pair();
        transport.dial().await.unwrap();
        peer.hang_up();

        assert!(transport.receive().await.is_none());
        assert!(!transport.is_connected());
        assert!(!peer.push("late"));
    }

    #[test]
    fn test_tungstenite_transport_starts_disconnected() {
        let transport = TungsteniteTransport::new(
            "wss://test.deribit.com/ws/api/v2".to_string(),
            "deribit".to_string(),
        );
        assert!(!transport.is_connected());
        assert_eq!(transport.url(), "wss://test.deribit.com/ws/api/v2");
    }
}
