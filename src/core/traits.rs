use crate::core::{
    errors::EngineError,
    types::{AssetClass, AssetScope, Pair},
};
use async_trait::async_trait;
use serde_json::{value::RawValue, Value};

/// Maps venue instrument names onto internal `(pair, asset)` tuples.
pub trait InstrumentLookup: Send + Sync {
    /// Fails with `UnknownInstrument` when the name is not configured.
    fn resolve(&self, instrument: &str) -> Result<(Pair, AssetClass), EngineError>;

    /// Enabled pairs per asset class within `scope`, used for template expansion.
    fn asset_pairs(&self, scope: &AssetScope) -> Vec<(AssetClass, Vec<Pair>)>;
}

/// Outcome of routing one unsolicited message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Unhandled,
}

/// Consumer of unsolicited (channel) traffic from the read loop.
pub trait PushHandler: Send + Sync {
    fn on_push(&self, channel: &str, data: &RawValue) -> Result<Dispatch, EngineError>;
}

/// Produces the login exchange for authenticated sessions.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Method name and parameters of the login request.
    async fn login_request(&self) -> Result<(String, Value), EngineError>;

    /// Inspects the venue's answer to the login request. An error fails the login.
    fn accept_login(&self, _result: &RawValue) -> Result<(), EngineError> {
        Ok(())
    }
}
