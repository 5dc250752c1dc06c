pub mod auth;
pub mod channels;
pub mod handlers;
pub mod types;

use crate::core::config::VenueConfig;
use crate::core::errors::EngineError;
use crate::core::kernel::session::{Session, SessionConfig};
use crate::core::kernel::transport::{Transport, TungsteniteTransport};
use crate::core::orderbook::OrderBookStore;
use crate::core::sink::{EventReceiver, EventSink};
use crate::core::subscription::{Subscription, SubscriptionManager};
use crate::core::traits::InstrumentLookup;
use std::sync::Arc;
use tracing::{info, instrument};

pub use auth::DeribitAuthenticator;
pub use channels::{classify_instrument, default_subscriptions, DeribitChannels};
pub use handlers::DeribitContext;

pub const DERIBIT_WS_URL: &str = "wss://www.deribit.com/ws/api/v2";
pub const DERIBIT_TESTNET_WS_URL: &str = "wss://test.deribit.com/ws/api/v2";

const VENUE: &str = "deribit";

/// One Deribit websocket connection with its subscriptions and order books.
pub struct DeribitStream {
    config: VenueConfig,
    session: Session,
    subscriptions: SubscriptionManager,
    books: OrderBookStore,
}

impl DeribitStream {
    /// Connects over tungstenite to the endpoint selected by `config`.
    pub fn new(
        config: VenueConfig,
        lookup: Arc<dyn InstrumentLookup>,
        session_config: SessionConfig,
    ) -> (Self, EventReceiver) {
        let url = config.endpoint(DERIBIT_WS_URL, DERIBIT_TESTNET_WS_URL);
        let transport = TungsteniteTransport::new(url, VENUE.to_string())
            .with_connect_timeout(session_config.connect_timeout());
        Self::with_transport(config, lookup, session_config, Arc::new(transport))
    }

    /// Same as [`DeribitStream::new`] over any transport.
    pub fn with_transport(
        config: VenueConfig,
        lookup: Arc<dyn InstrumentLookup>,
        session_config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, EventReceiver) {
        let (sink, events) = EventSink::channel(session_config.event_buffer_size);
        let books = OrderBookStore::new();

        let handler = handlers::push_handler(DeribitContext {
            lookup: Arc::clone(&lookup),
            books: books.clone(),
            sink: sink.clone(),
            trade_feed: true,
        });
        let session = Session::new(
            transport,
            session_config.venue(VENUE),
            Arc::new(handler),
            sink,
        );
        let subscriptions =
            SubscriptionManager::new(session.clone(), Arc::new(DeribitChannels), lookup);

        (
            Self {
                config,
                session,
                subscriptions,
                books,
            },
            events,
        )
    }

    /// Dials and logs in when credentials are configured.
    #[instrument(skip(self), fields(venue = VENUE, testnet = self.config.testnet))]
    pub async fn connect(&self) -> Result<(), EngineError> {
        if self.config.wants_authentication() {
            let authenticator = DeribitAuthenticator::new(
                self.config.api_key().to_string(),
                self.config.secret_key().to_string(),
            );
            self.session.connect(Some(&authenticator)).await
        } else {
            self.session.connect(None).await
        }
    }

    pub async fn subscribe(&self, list: &[Subscription]) -> Result<(), EngineError> {
        self.subscriptions.subscribe(list).await
    }

    pub async fn unsubscribe(&self, list: &[Subscription]) -> Result<(), EngineError> {
        self.subscriptions.unsubscribe(list).await
    }

    pub async fn subscribe_defaults(&self) -> Result<(), EngineError> {
        self.subscribe(&default_subscriptions()).await
    }

    /// Venue clock in milliseconds.
    pub async fn server_time(&self) -> Result<i64, EngineError> {
        self.session
            .request("public/get_time", &serde_json::json!({}))
            .await
    }

    /// Closes the connection and forgets subscriptions and books.
    pub async fn close(&self) -> Result<(), EngineError> {
        let result = self.session.close().await;
        self.subscriptions.clear();
        self.books.clear();
        info!("deribit stream closed");
        result
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    pub const fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub const fn books(&self) -> &OrderBookStore {
        &self.books
    }

    pub const fn config(&self) -> &VenueConfig {
        &self.config
    }
}
