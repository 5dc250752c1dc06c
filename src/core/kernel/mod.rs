//! Venue-agnostic connection kernel.
//!
//! - [`transport`]: the byte-frame [`Transport`] seam, a tungstenite
//!   implementation and an in-memory pair for tests.
//! - [`codec`]: JSON-RPC request and response envelopes.
//! - [`correlator`]: identifier-keyed rendezvous for request/response pairs.
//! - [`session`]: the read loop, heartbeats, login and correlated requests.
//! - [`signer`]: HMAC signing for login grants.
//!
//! Nothing here knows about a particular venue. Adapters plug in through
//! [`PushHandler`](crate::core::traits::PushHandler),
//! [`Authenticator`](crate::core::traits::Authenticator) and the
//! control-method names in [`SessionConfig`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use venuelink::core::kernel::*;
//! use venuelink::core::sink::EventSink;
//! use venuelink::core::router::{RoutedHandler, Router};
//!
//! # async fn example() -> Result<(), venuelink::core::errors::EngineError> {
//! let transport = TungsteniteTransport::new(
//!     "wss://test.deribit.com/ws/api/v2".to_string(),
//!     "deribit".to_string(),
//! );
//! let (sink, mut events) = EventSink::channel(None);
//! let handler = RoutedHandler::new((), Router::new());
//! let session = Session::new(Arc::new(transport), SessionConfig::default(), Arc::new(handler), sink);
//!
//! session.connect(None).await?;
//! let time = session.send_request("public/get_time", &serde_json::json!({})).await?;
//! println!("server time {}", time.get());
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod correlator;
pub mod session;
pub mod signer;
pub mod transport;

pub use codec::{JsonRpcCodec, ResponseEnvelope, RpcError};
pub use correlator::{Correlator, RequestId, Waiter};
pub use session::{AuthState, Session, SessionConfig};
pub use signer::{generate_nonce, HmacSigner, SignedLogin};
pub use transport::{ChannelTransport, Transport, TransportPeer, TungsteniteTransport};
