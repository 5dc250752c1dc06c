use crate::core::kernel::correlator::RequestId;
use crate::core::subscription::SubscriptionErrors;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Duplicate request identifier: {0}")]
    DuplicateIdentifier(RequestId),

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: RequestId, timeout_ms: u64 },

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Order book {pair} {asset} desynchronised: stored update id {stored}, received {received}")]
    Desynchronization {
        pair: String,
        asset: String,
        stored: u64,
        received: u64,
    },

    #[error("Order book not found for {pair} {asset}")]
    OrderbookNotFound { pair: String, asset: String },

    #[error(transparent)]
    Subscription(#[from] SubscriptionErrors),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {code} - {message}")]
    Api { code: i64, message: String },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),

    #[error(transparent)]
    Types(#[from] crate::core::types::TypesError),

    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// Errors that end the session rather than a single message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub(crate) fn malformed(context: impl std::fmt::Display) -> Self {
        Self::MalformedData(context.to_string())
    }
}
