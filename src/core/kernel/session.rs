use crate::core::errors::EngineError;
use crate::core::kernel::codec::{JsonRpcCodec, ResponseEnvelope};
use crate::core::kernel::correlator::{Correlator, RequestId};
use crate::core::kernel::transport::Transport;
use crate::core::sink::EventSink;
use crate::core::traits::{Authenticator, Dispatch, PushHandler};
use crate::core::types::StreamEvent;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Session tuning and the venue's control-message vocabulary.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Venue name for logging
    pub venue: String,
    /// Dial timeout handed to network transports
    pub connect_timeout_ms: u64,
    /// How long `send_request` waits for its response
    pub request_timeout_ms: u64,
    /// Interval requested from the venue; `None` skips heartbeat setup
    pub heartbeat_interval_secs: Option<u64>,
    /// Event sink capacity; `None` for an unbounded sink
    pub event_buffer_size: Option<usize>,
    /// Ids `1..=reserved_ids` carry control traffic and are never correlated
    pub reserved_ids: u64,
    pub heartbeat_method: String,
    pub ping_method: String,
    pub ping_id: u64,
    pub set_heartbeat_method: String,
    pub set_heartbeat_id: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            venue: "venue".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            heartbeat_interval_secs: Some(15),
            event_buffer_size: None,
            reserved_ids: 2,
            heartbeat_method: "heartbeat".to_string(),
            ping_method: "public/test".to_string(),
            ping_id: 2,
            set_heartbeat_method: "public/set_heartbeat".to_string(),
            set_heartbeat_id: 1,
        }
    }
}

impl SessionConfig {
    /// Tighter timeouts and heartbeat for latency-sensitive consumers.
    pub fn low_latency() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 3_000,
            heartbeat_interval_secs: Some(10),
            event_buffer_size: Some(4096),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = venue.into();
        self
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    AuthFailed,
}

impl AuthState {
    /// Allowed moves while connected; disconnect resets separately.
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Unauthenticated, Self::Authenticating)
                | (Self::Authenticating, Self::Authenticated | Self::AuthFailed)
                | (Self::AuthFailed, Self::Unauthenticated)
        )
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    codec: JsonRpcCodec,
    correlator: Correlator<ResponseEnvelope>,
    config: SessionConfig,
    next_id: AtomicU64,
    auth: Mutex<AuthState>,
    authenticated_endpoints: AtomicBool,
    connected: AtomicBool,
    sink: EventSink,
    handler: Arc<dyn PushHandler>,
    shutdown: Mutex<CancellationToken>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// One duplex connection: read loop, correlated requests, heartbeats and
/// login state. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        handler: Arc<dyn PushHandler>,
        sink: EventSink,
    ) -> Self {
        let first_id = config.reserved_ids + 1;
        Self {
            inner: Arc::new(SessionInner {
                transport,
                codec: JsonRpcCodec::default(),
                correlator: Correlator::new(),
                config,
                next_id: AtomicU64::new(first_id),
                auth: Mutex::new(AuthState::Unauthenticated),
                authenticated_endpoints: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                sink,
                handler,
                shutdown: Mutex::new(CancellationToken::new()),
                reader: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn auth_state(&self) -> AuthState {
        *self.inner.auth.lock()
    }

    pub fn can_use_authenticated_endpoints(&self) -> bool {
        self.inner.authenticated_endpoints.load(Ordering::Acquire)
    }

    pub fn outstanding_requests(&self) -> usize {
        self.inner.correlator.outstanding()
    }

    pub fn sink(&self) -> &EventSink {
        &self.inner.sink
    }

    /// Dials, starts the read loop, logs in when an authenticator is given
    /// and finally enables venue heartbeats. A failed login leaves the
    /// session connected with authenticated endpoints disabled.
    #[instrument(skip(self, authenticator), fields(venue = %self.inner.config.venue))]
    pub async fn connect(&self, authenticator: Option<&dyn Authenticator>) -> Result<(), EngineError> {
        if self.is_connected() {
            return Err(EngineError::Transport("session already connected".to_string()));
        }
        self.inner.transport.dial().await?;
        self.inner.connected.store(true, Ordering::Release);

        let token = CancellationToken::new();
        *self.inner.shutdown.lock() = token.clone();
        let handle = tokio::spawn(read_loop(Arc::clone(&self.inner), token));
        *self.inner.reader.lock() = Some(handle);

        if let Some(authenticator) = authenticator {
            if let Err(e) = self.login(authenticator).await {
                error!("authentication failed: {}", e);
            }
        }

        if let Some(interval) = self.inner.config.heartbeat_interval_secs {
            let config = &self.inner.config;
            if let Err(e) = self
                .send_with_id(
                    config.set_heartbeat_id,
                    &config.set_heartbeat_method,
                    &json!({ "interval": interval }),
                )
                .await
            {
                error!("failed to enable heartbeats: {}", e);
                if let Err(close_err) = self.close().await {
                    warn!("close after failed connect: {}", close_err);
                }
                self.inner.connected.store(false, Ordering::Release);
                return Err(e);
            }
        }

        info!("session connected");
        Ok(())
    }

    /// Performs the login exchange. Callable again after a failure.
    #[instrument(skip(self, authenticator), fields(venue = %self.inner.config.venue))]
    pub async fn login(&self, authenticator: &dyn Authenticator) -> Result<(), EngineError> {
        if self.auth_state() == AuthState::AuthFailed {
            self.transition_auth(AuthState::Unauthenticated);
        }
        if !self.transition_auth(AuthState::Authenticating) {
            return Err(EngineError::AuthenticationFailed(format!(
                "cannot log in from state {:?}",
                self.auth_state()
            )));
        }

        let outcome = match authenticator.login_request().await {
            Ok((method, params)) => match self.send_request(&method, &params).await {
                Ok(result) => authenticator.accept_login(&result),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.transition_auth(AuthState::Authenticated);
                self.inner.authenticated_endpoints.store(true, Ordering::Release);
                info!("authenticated");
                Ok(())
            }
            Err(e) => {
                self.transition_auth(AuthState::AuthFailed);
                self.inner
                    .authenticated_endpoints
                    .store(false, Ordering::Release);
                Err(EngineError::AuthenticationFailed(e.to_string()))
            }
        }
    }

    fn transition_auth(&self, to: AuthState) -> bool {
        let mut state = self.inner.auth.lock();
        if state.can_transition(to) {
            debug!(from = ?*state, ?to, "auth state change");
            *state = to;
            true
        } else {
            warn!(from = ?*state, ?to, "rejected auth state change");
            false
        }
    }

    /// Sends without tracking a response. The message carries the highest
    /// reserved id, so any reply is dropped by the read loop.
    pub async fn send_fire_and_forget<P: Serialize + Sync>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<(), EngineError> {
        self.send_with_id(self.inner.config.reserved_ids, method, params)
            .await
    }

    pub async fn send_raw(&self, frame: Vec<u8>) -> Result<(), EngineError> {
        self.inner.transport.send(frame).await
    }

    async fn send_with_id<P: Serialize + Sync>(
        &self,
        id: u64,
        method: &str,
        params: &P,
    ) -> Result<(), EngineError> {
        self.inner.send_with_id(id, method, params).await
    }

    /// Sends a request under the next free id and waits for its response.
    pub async fn send_request<P: Serialize + Sync>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Box<RawValue>, EngineError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.send_request_with_id(RequestId::Num(id), method, params)
            .await
    }

    /// `send_request` with a caller-chosen identifier.
    #[instrument(skip(self, params), fields(venue = %self.inner.config.venue, id = %id))]
    pub async fn send_request_with_id<P: Serialize + Sync>(
        &self,
        id: RequestId,
        method: &str,
        params: &P,
    ) -> Result<Box<RawValue>, EngineError> {
        let inner = &self.inner;
        let mut waiter = inner.correlator.register(id.clone())?;

        let sent = match inner.codec.encode_request(id.clone(), method, params) {
            Ok(frame) => inner.transport.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            inner.correlator.cleanup(&waiter);
            return Err(e);
        }

        let timeout = inner.config.request_timeout();
        match tokio::time::timeout(timeout, waiter.recv()).await {
            Ok(Ok(envelope)) => envelope.into_result(),
            Ok(Err(e)) => {
                inner.correlator.cleanup(&waiter);
                Err(e)
            }
            Err(_) => {
                inner.correlator.cleanup(&waiter);
                warn!(method, "request timed out");
                Err(EngineError::Timeout {
                    id,
                    timeout_ms: inner.config.request_timeout_ms,
                })
            }
        }
    }

    /// Typed convenience over `send_request`.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, EngineError>
    where
        P: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let raw = self.send_request(method, params).await?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Stops the read loop and closes the transport.
    #[instrument(skip(self), fields(venue = %self.inner.config.venue))]
    pub async fn close(&self) -> Result<(), EngineError> {
        self.inner.shutdown.lock().cancel();
        let result = self.inner.transport.close().await;

        let handle = self.inner.reader.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("read loop ended abnormally: {}", e);
            }
        }
        result
    }
}

impl SessionInner {
    async fn send_with_id<P: Serialize + Sync>(
        &self,
        id: u64,
        method: &str,
        params: &P,
    ) -> Result<(), EngineError> {
        let frame = self.codec.encode_request(RequestId::Num(id), method, params)?;
        self.transport.send(frame).await
    }

    async fn handle_frame(&self, frame: &[u8]) -> Result<(), EngineError> {
        let envelope = self.codec.decode(frame)?;

        if envelope.method.as_deref() == Some(self.config.heartbeat_method.as_str()) {
            // answered before anything else; the venue drops silent sessions
            return self
                .send_with_id(self.config.ping_id, &self.config.ping_method, &json!({}))
                .await;
        }

        let correlated = match &envelope.id {
            Some(RequestId::Str(_)) => true,
            Some(RequestId::Num(id)) if *id > self.config.reserved_ids => true,
            // control acks
            Some(RequestId::Num(id)) if *id > 0 => return Ok(()),
            _ => false,
        };
        if correlated {
            self.deliver(envelope);
            return Ok(());
        }

        let Some(channel) = envelope.channel() else {
            if !envelope.is_ok_ack() {
                self.report_unhandled(frame);
            }
            return Ok(());
        };

        let null;
        let data = match envelope.params.as_ref().and_then(|p| p.data.as_deref()) {
            Some(data) => data,
            None => {
                null = RawValue::from_string("null".to_string())?;
                &*null
            }
        };

        if self.handler.on_push(channel, data)? == Dispatch::Unhandled {
            self.report_unhandled(frame);
        }
        Ok(())
    }

    fn deliver(&self, envelope: ResponseEnvelope) {
        let Some(id) = envelope.id.clone() else {
            return;
        };
        if !self.correlator.deliver(&id, envelope) {
            warn!(venue = %self.config.venue, %id, "no pending request for response");
            self.sink.emit(StreamEvent::Warning(format!(
                "{}: no pending request for response id {}",
                self.config.venue, id
            )));
        }
    }

    fn report_unhandled(&self, frame: &[u8]) {
        let raw = String::from_utf8_lossy(frame);
        debug!(venue = %self.config.venue, "unhandled message: {}", raw);
        self.sink.emit(StreamEvent::Warning(format!(
            "{} unhandled message: {}",
            self.config.venue, raw
        )));
    }

    fn on_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.correlator.close_all();
        *self.auth.lock() = AuthState::Unauthenticated;
        self.authenticated_endpoints.store(false, Ordering::Release);
        self.sink.emit(StreamEvent::Disconnected);
    }
}

async fn read_loop(inner: Arc<SessionInner>, shutdown: CancellationToken) {
    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(venue = %inner.config.venue, "read loop shutdown requested");
                break;
            }
            frame = inner.transport.receive() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                match inner.handle_frame(&frame).await {
                    Ok(()) => {}
                    Err(EngineError::UnknownInstrument(name)) => {
                        warn!(venue = %inner.config.venue, "skipping message for unknown instrument {}", name);
                        inner.sink.emit(StreamEvent::Warning(format!(
                            "{}: unknown instrument {}",
                            inner.config.venue, name
                        )));
                    }
                    Err(e) => {
                        let fatal = e.is_fatal();
                        warn!(venue = %inner.config.venue, "failed to handle message: {}", e);
                        inner.sink.emit(StreamEvent::Error(e));
                        if fatal {
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(venue = %inner.config.venue, "transport read failed: {}", e);
                inner.sink.emit(StreamEvent::Error(e));
                break;
            }
            None => {
                info!(venue = %inner.config.venue, "stream ended");
                break;
            }
        }
    }

    inner.on_disconnect();
}
