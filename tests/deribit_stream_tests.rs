use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use venuelink::core::config::VenueConfig;
use venuelink::core::errors::EngineError;
use venuelink::core::instruments::InstrumentRegistry;
use venuelink::core::kernel::{AuthState, ChannelTransport, SessionConfig, TransportPeer};
use venuelink::core::sink::EventReceiver;
use venuelink::core::subscription::{keys, Subscription, SubscriptionOutcome};
use venuelink::core::types::{AssetClass, Interval, Pair, StreamEvent};
use venuelink::exchanges::deribit::{classify_instrument, DeribitStream};

fn create_registry() -> Arc<InstrumentRegistry> {
    let registry = Arc::new(InstrumentRegistry::new());
    for name in ["BTC-PERPETUAL", "ETH-PERPETUAL"] {
        let (pair, asset) = classify_instrument(name).unwrap();
        registry.insert(name, pair, asset);
    }
    registry
}

fn create_stream(config: VenueConfig) -> (DeribitStream, EventReceiver, TransportPeer) {
    let (transport, peer) = ChannelTransport::pair();
    let (stream, events) = DeribitStream::with_transport(
        config,
        create_registry(),
        SessionConfig::default(),
        Arc::new(transport),
    );
    (stream, events, peer)
}

async fn next_sent(peer: &mut TransportPeer) -> Value {
    timeout(Duration::from_secs(1), peer.next_sent())
        .await
        .expect("client sent nothing")
        .expect("client frame was not JSON")
}

async fn next_event(events: &mut EventReceiver) -> StreamEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no event")
        .expect("event stream ended")
}

fn push(peer: &TransportPeer, channel: &str, data: Value) {
    assert!(peer.push_json(&json!({
        "jsonrpc": "2.0",
        "method": "subscription",
        "params": { "channel": channel, "data": data },
    })));
}

fn perpetual() -> Pair {
    Pair::new("BTC", "PERPETUAL", "-").unwrap()
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_public_connect_and_server_time() {
        let (stream, _events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();

        let heartbeat = next_sent(&mut peer).await;
        assert_eq!(heartbeat["id"], 1);
        assert_eq!(heartbeat["method"], "public/set_heartbeat");
        assert_eq!(heartbeat["params"]["interval"], 15);
        assert_eq!(stream.session().auth_state(), AuthState::Unauthenticated);

        let (time, ()) = tokio::join!(stream.server_time(), async {
            let request = next_sent(&mut peer).await;
            assert_eq!(request["method"], "public/get_time");
            assert_eq!(request["id"], 3);
            peer.push_json(&json!({ "jsonrpc": "2.0", "id": 3, "result": 1_700_000_000_000_i64 }));
        });
        assert_eq!(time.unwrap(), 1_700_000_000_000);
        assert_eq!(stream.session().outstanding_requests(), 0);
    }

    #[tokio::test]
    async fn test_venue_heartbeat_is_answered() {
        let (stream, _events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();
        next_sent(&mut peer).await;

        peer.push_json(&json!({
            "jsonrpc": "2.0",
            "method": "heartbeat",
            "params": { "type": "test_request" },
        }));
        let ping = next_sent(&mut peer).await;
        assert_eq!(ping["id"], 2);
        assert_eq!(ping["method"], "public/test");
    }

    #[tokio::test]
    async fn test_login_with_credentials() {
        let config = VenueConfig::new("client-id".to_string(), "client-secret".to_string());
        let (stream, _events, mut peer) = create_stream(config);

        let (connected, ()) = tokio::join!(stream.connect(), async {
            let login = next_sent(&mut peer).await;
            assert_eq!(login["method"], "public/auth");
            assert_eq!(login["params"]["grant_type"], "client_signature");
            assert_eq!(login["params"]["client_id"], "client-id");
            assert_eq!(login["params"]["signature"].as_str().unwrap().len(), 64);
            peer.push_json(&json!({
                "jsonrpc": "2.0",
                "id": login["id"],
                "result": {
                    "access_token": "token",
                    "expires_in": 900,
                    "refresh_token": "refresh",
                    "scope": "connection",
                    "token_type": "bearer",
                },
            }));
        });
        connected.unwrap();
        assert_eq!(stream.session().auth_state(), AuthState::Authenticated);
        assert!(stream.session().can_use_authenticated_endpoints());
        assert_eq!(next_sent(&mut peer).await["method"], "public/set_heartbeat");

        let orders = [Subscription::new(keys::MY_ORDERS)
            .interval(Interval::Raw)
            .authenticated()];
        let (result, ()) = tokio::join!(stream.subscribe(&orders), async {
            let request = next_sent(&mut peer).await;
            assert_eq!(request["method"], "private/subscribe");
            let channels = request["params"]["channels"].clone();
            assert_eq!(channels.as_array().unwrap().len(), 2);
            peer.push_json(&json!({ "jsonrpc": "2.0", "id": request["id"], "result": channels }));
        });
        result.unwrap();
        assert!(stream.subscriptions().is_active("user.orders.BTC-PERPETUAL.raw"));
    }

    #[tokio::test]
    async fn test_refused_login_keeps_public_session() {
        let config = VenueConfig::new("client-id".to_string(), "wrong".to_string());
        let (stream, _events, mut peer) = create_stream(config);

        let (connected, ()) = tokio::join!(stream.connect(), async {
            let login = next_sent(&mut peer).await;
            peer.push_json(&json!({
                "jsonrpc": "2.0",
                "id": login["id"],
                "error": { "code": 13004, "message": "invalid_credentials" },
            }));
        });
        connected.unwrap();
        assert!(stream.session().is_connected());
        assert_eq!(stream.session().auth_state(), AuthState::AuthFailed);
        assert!(!stream.session().can_use_authenticated_endpoints());
    }

    #[tokio::test]
    async fn test_default_subscriptions_without_credentials() {
        let (stream, _events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();
        next_sent(&mut peer).await;

        let (result, ()) = tokio::join!(stream.subscribe_defaults(), async {
            let request = next_sent(&mut peer).await;
            assert_eq!(request["method"], "public/subscribe");
            let mut channels = request["params"]["channels"].as_array().unwrap().clone();
            assert_eq!(channels.len(), 8);
            // venue drops one channel from the ack
            channels.retain(|c| c != "trades.ETH-PERPETUAL.100ms");
            peer.push_json(&json!({ "jsonrpc": "2.0", "id": request["id"], "result": channels }));
        });

        let Err(EngineError::Subscription(errors)) = result else {
            panic!("expected subscription errors, got {:?}", result);
        };
        // one unacked public channel plus four private ones without a login
        assert_eq!(errors.requested, 12);
        assert_eq!(errors.failed_count(), 5);
        assert_eq!(errors.outcome(), SubscriptionOutcome::PartiallyFailed);
        assert!(errors
            .failures
            .iter()
            .any(|f| f.channel == "trades.ETH-PERPETUAL.100ms" && f.reason == "failed to public/subscribe"));
        assert_eq!(stream.subscriptions().active().len(), 7);
        assert!(peer.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_book_synchronisation() {
        let (stream, mut events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();
        next_sent(&mut peer).await;

        push(
            &peer,
            "book.BTC-PERPETUAL.100ms",
            json!({
                "type": "snapshot",
                "timestamp": 1_700_000_000_000_i64,
                "instrument_name": "BTC-PERPETUAL",
                "change_id": 10,
                "bids": [["new", 42000.5, 1000.0], ["new", 41999.0, 500.0]],
                "asks": [["new", 42001.0, 750.0]],
            }),
        );
        assert!(matches!(next_event(&mut events).await, StreamEvent::BookSnapshot(_)));

        push(
            &peer,
            "book.BTC-PERPETUAL.100ms",
            json!({
                "type": "change",
                "timestamp": 1_700_000_000_100_i64,
                "instrument_name": "BTC-PERPETUAL",
                "change_id": 11,
                "prev_change_id": 10,
                "bids": [["delete", 42000.5, 0.0], ["new", 42000.0, 20.0]],
                "asks": [],
            }),
        );
        assert!(matches!(next_event(&mut events).await, StreamEvent::BookUpdate(_)));

        let books = stream.books();
        let bid = books.best_bid(&perpetual(), AssetClass::Futures).unwrap();
        assert_eq!(bid.price, dec!(42000));
        assert_eq!(bid.amount, dec!(20));
        assert_eq!(books.last_update_id(&perpetual(), AssetClass::Futures), Some(11));

        // gap in the change chain
        push(
            &peer,
            "book.BTC-PERPETUAL.100ms",
            json!({
                "type": "change",
                "timestamp": 1_700_000_000_200_i64,
                "instrument_name": "BTC-PERPETUAL",
                "change_id": 14,
                "prev_change_id": 13,
                "bids": [["new", 42000.8, 5.0]],
                "asks": [],
            }),
        );
        match next_event(&mut events).await {
            StreamEvent::Error(EngineError::Desynchronization { stored, received, .. }) => {
                assert_eq!(stored, 11);
                assert_eq!(received, 13);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(books.last_update_id(&perpetual(), AssetClass::Futures), Some(11));
        assert!(stream.session().is_connected());
    }

    #[tokio::test]
    async fn test_ticker_and_unknown_instrument() {
        let (stream, mut events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();
        next_sent(&mut peer).await;

        push(
            &peer,
            "ticker.SOL-PERPETUAL.100ms",
            json!({ "timestamp": 1_700_000_000_000_i64, "instrument_name": "SOL-PERPETUAL" }),
        );
        assert!(matches!(next_event(&mut events).await, StreamEvent::Warning(_)));

        push(
            &peer,
            "ticker.ETH-PERPETUAL.100ms",
            json!({
                "timestamp": 1_700_000_000_000_i64,
                "instrument_name": "ETH-PERPETUAL",
                "best_bid_price": 2250.5,
                "best_ask_price": 2251.0,
                "best_bid_amount": 100.0,
                "best_ask_amount": 50.0,
                "last_price": 2250.75,
                "stats": { "high": 2300.0, "low": 2200.0, "volume": 1234.5, "volume_usd": 2_780_000.0 },
            }),
        );
        match next_event(&mut events).await {
            StreamEvent::Ticker(ticker) => {
                assert_eq!(ticker.pair.base, "ETH");
                assert_eq!(ticker.last, Some(dec!(2250.75)));
                assert_eq!(ticker.quote_volume, Some(dec!(2780000)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_and_close() {
        let (stream, mut events, mut peer) = create_stream(VenueConfig::read_only());
        stream.connect().await.unwrap();
        next_sent(&mut peer).await;

        push(
            &peer,
            "book.BTC-PERPETUAL.100ms",
            json!({
                "type": "snapshot",
                "timestamp": 1_700_000_000_000_i64,
                "instrument_name": "BTC-PERPETUAL",
                "change_id": 1,
                "bids": [["new", 100.0, 1.0]],
                "asks": [],
            }),
        );
        next_event(&mut events).await;
        assert_eq!(stream.books().len(), 1);

        peer.hang_up();
        assert!(matches!(next_event(&mut events).await, StreamEvent::Disconnected));
        assert!(!stream.session().is_connected());

        stream.close().await.unwrap();
        assert!(stream.books().is_empty());
        assert!(stream.subscriptions().active().is_empty());
        println!("✅ stream closed cleanly");
    }
}
