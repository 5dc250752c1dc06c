use std::sync::Arc;
use tracing::{info, warn};
use venuelink::core::config::VenueConfig;
use venuelink::core::instruments::InstrumentRegistry;
use venuelink::core::kernel::SessionConfig;
use venuelink::core::types::StreamEvent;
use venuelink::exchanges::deribit::{classify_instrument, DeribitStream};

const INSTRUMENTS: &[&str] = &["BTC-PERPETUAL", "ETH-PERPETUAL", "BTC_USDC"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Public channels only unless DERIBIT_API_KEY / DERIBIT_SECRET_KEY are set
    let config = VenueConfig::from_env_file("DERIBIT").unwrap_or_else(|e| {
        warn!("no credentials ({}), streaming public channels", e);
        VenueConfig::read_only().testnet(true)
    });

    let registry = Arc::new(InstrumentRegistry::new());
    for name in INSTRUMENTS {
        let (pair, asset) = classify_instrument(name)?;
        registry.insert(*name, pair, asset);
    }

    let (stream, mut events) = DeribitStream::new(config, registry, SessionConfig::default());
    stream.connect().await?;
    info!("server time {}", stream.server_time().await?);

    if let Err(e) = stream.subscribe_defaults().await {
        warn!("some subscriptions failed: {}", e);
    }
    for subscription in stream.subscriptions().active() {
        info!("subscribed {}", subscription);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(StreamEvent::BookSnapshot(book)) => {
                    info!("{} snapshot: {} bids, {} asks", book.pair, book.bids.len(), book.asks.len());
                }
                Some(StreamEvent::BookUpdate(delta)) => {
                    if let Some(bid) = stream.books().best_bid(&delta.pair, delta.asset) {
                        info!("{} best bid {} x {}", delta.pair, bid.price, bid.amount);
                    }
                }
                Some(StreamEvent::Ticker(ticker)) => {
                    info!("{} last {:?}", ticker.pair, ticker.last);
                }
                Some(StreamEvent::Disconnected) | None => {
                    warn!("stream disconnected");
                    break;
                }
                Some(other) => info!("{:?}", other),
            },
        }
    }

    stream.close().await?;
    Ok(())
}
