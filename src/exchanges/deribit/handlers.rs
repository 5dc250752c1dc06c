//! Deribit channel handlers and their routing table.

use super::types::{
    DeribitCandle, DeribitChanges, DeribitOrder, DeribitOrderbook, DeribitQuote, DeribitTicker,
    DeribitTrade,
};
use crate::core::errors::EngineError;
use crate::core::orderbook::OrderBookStore;
use crate::core::router::{ChannelFn, RoutedHandler, Router};
use crate::core::sink::EventSink;
use crate::core::traits::InstrumentLookup;
use crate::core::types::{
    millis_to_utc, AssetClass, Kline, Level, OrderBookDelta, OrderBookSnapshot, OrderDetail,
    OrderSide, OrderStatus, OrderType, StreamEvent, Ticker, Trade,
};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::trace;

/// State shared by every handler.
pub struct DeribitContext {
    pub lookup: Arc<dyn InstrumentLookup>,
    pub books: OrderBookStore,
    pub sink: EventSink,
    /// Emit public and private trade prints.
    pub trade_feed: bool,
}

type Handler = ChannelFn<DeribitContext>;

pub fn router() -> Router<DeribitContext> {
    Router::new()
        .route("announcements", data)
        .route("book", orderbook)
        .route("chart", candles)
        .route("deribit_price_index", data)
        .route("deribit_price_ranking", data)
        .route("deribit_price_statistics", data)
        .route("deribit_volatility_index", data)
        .route("estimated_expiration_price", data)
        .route("incremental_ticker", incremental_ticker)
        .route("instrument", data)
        .route("markprice", data)
        .route("perpetual", data)
        .route("platform_state", data)
        .route("quote", quote)
        .route("rfq", data)
        .route("ticker", ticker)
        .route("trades", trades)
        .nested(
            "user",
            [
                ("access_log", data as Handler),
                ("changes", user_changes as Handler),
                ("lock", data as Handler),
                ("mmp_trigger", mmp_trigger as Handler),
                ("orders", user_orders as Handler),
                ("portfolio", data as Handler),
                ("trades", trades as Handler),
            ],
        )
}

pub fn push_handler(ctx: DeribitContext) -> RoutedHandler<DeribitContext> {
    RoutedHandler::new(ctx, router())
}

fn expect_segments(
    segments: &[&str],
    allowed: RangeInclusive<usize>,
    pattern: &str,
) -> Result<(), EngineError> {
    if allowed.contains(&segments.len()) {
        Ok(())
    } else {
        Err(EngineError::malformed(format!(
            "expected format '{}', but found {}",
            pattern,
            segments.join(".")
        )))
    }
}

fn decode<T: DeserializeOwned>(segments: &[&str], data: &RawValue) -> Result<T, EngineError> {
    serde_json::from_str(data.get()).map_err(|e| {
        EngineError::malformed(format!("{} payload: {}", segments.join("."), e))
    })
}

fn data(ctx: &DeribitContext, segments: &[&str], data: &RawValue) -> Result<(), EngineError> {
    let payload: Value = decode(segments, data)?;
    ctx.sink.emit(StreamEvent::Data {
        channel: segments.join("."),
        payload,
    });
    Ok(())
}

fn mmp_trigger(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(segments, 3..=3, "user.mmp_trigger.{index_name}")?;
    let mut payload: Value = decode(segments, raw)?;
    if let Value::Object(map) = &mut payload {
        map.entry("currency")
            .or_insert_with(|| Value::String(segments[2].to_string()));
    }
    ctx.sink.emit(StreamEvent::Data {
        channel: segments.join("."),
        payload,
    });
    Ok(())
}

fn number(value: &Value, field: &str) -> Result<Decimal, EngineError> {
    value
        .as_f64()
        .and_then(Decimal::from_f64)
        .ok_or_else(|| EngineError::malformed(format!("invalid orderbook {}: {}", field, value)))
}

/// Rows of `[action, price, amount]` or `[price, amount]`; zero-price rows
/// are placeholders and skipped.
fn levels(rows: &[Vec<Value>], width: usize) -> Result<Vec<Level>, EngineError> {
    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != width {
            return Err(EngineError::malformed(format!(
                "orderbook level has {} fields, expected {}",
                row.len(),
                width
            )));
        }
        let price = number(&row[width - 2], "price")?;
        if price.is_zero() {
            continue;
        }
        let amount = number(&row[width - 1], "amount")?;
        levels.push(Level::new(price, amount));
    }
    Ok(levels)
}

fn orderbook(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    let width = match segments.len() {
        3 => 3,
        5 => 2,
        _ => {
            return expect_segments(
                segments,
                3..=3,
                "book.{instrument_name}.{interval} or book.{instrument_name}.{group}.{depth}.{interval}",
            )
        }
    };
    let book: DeribitOrderbook = decode(segments, raw)?;
    let asks = levels(&book.asks, width)?;
    let bids = levels(&book.bids, width)?;
    if asks.is_empty() && bids.is_empty() {
        return Ok(());
    }

    let (pair, asset) = ctx.lookup.resolve(&book.instrument_name)?;
    let timestamp = millis_to_utc(book.timestamp);
    // grouped books always carry full state
    let kind = if width == 2 {
        "snapshot"
    } else {
        book.kind.as_deref().unwrap_or_default()
    };

    match kind {
        "snapshot" => {
            let snapshot = OrderBookSnapshot {
                pair,
                asset,
                bids,
                asks,
                update_id: book.change_id,
                last_updated: timestamp,
            };
            ctx.books.load_snapshot(&snapshot)?;
            ctx.sink.emit(StreamEvent::BookSnapshot(snapshot));
        }
        "change" => {
            let delta = OrderBookDelta {
                pair,
                asset,
                bids,
                asks,
                update_id: book.change_id,
                previous_update_id: book.prev_change_id,
                update_time: timestamp,
            };
            ctx.books.apply_update(&delta)?;
            ctx.sink.emit(StreamEvent::BookUpdate(delta));
        }
        other => {
            return Err(EngineError::malformed(format!(
                "unknown orderbook update type {:?}",
                other
            )))
        }
    }
    Ok(())
}

fn candles(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(segments, 4..=4, "chart.trades.{instrument_name}.{resolution}")?;
    let (pair, asset) = ctx.lookup.resolve(segments[2])?;
    let candle: DeribitCandle = decode(segments, raw)?;
    ctx.sink.emit(StreamEvent::Kline(Kline {
        pair,
        asset,
        resolution: segments[3].to_string(),
        open: candle.open,
        high: candle.high,
        low: candle.low,
        close: candle.close,
        volume: candle.volume,
        timestamp: millis_to_utc(candle.tick),
    }));
    Ok(())
}

fn ticker(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(segments, 3..=3, "ticker.{instrument_name}.{interval}")?;
    let (pair, asset) = ctx.lookup.resolve(segments[1])?;
    let t: DeribitTicker = decode(segments, raw)?;

    let mut ticker = Ticker {
        pair,
        asset,
        bid: t.best_bid_price,
        ask: t.best_ask_price,
        bid_size: t.best_bid_amount,
        ask_size: t.best_ask_amount,
        last: t.last_price,
        high: t.stats.high,
        low: t.stats.low,
        volume: t.stats.volume,
        quote_volume: t.stats.volume_usd,
        last_updated: millis_to_utc(t.timestamp),
    };
    // options and combos quote implied prices against the mark
    if asset != AssetClass::Futures {
        ticker.low = t.min_price;
        ticker.high = t.max_price;
        ticker.last = t.mark_price;
        ticker.ask = t.implied_ask;
        ticker.bid = t.implied_bid;
    }
    ctx.sink.emit(StreamEvent::Ticker(ticker));
    Ok(())
}

fn incremental_ticker(
    ctx: &DeribitContext,
    segments: &[&str],
    raw: &RawValue,
) -> Result<(), EngineError> {
    expect_segments(segments, 2..=2, "incremental_ticker.{instrument_name}")?;
    let (pair, asset) = ctx.lookup.resolve(segments[1])?;
    let t: DeribitTicker = decode(segments, raw)?;
    ctx.sink.emit(StreamEvent::Ticker(Ticker {
        pair,
        asset,
        bid: t.implied_bid,
        ask: t.implied_ask,
        bid_size: t.best_bid_amount,
        ask_size: t.best_ask_amount,
        last: None,
        high: t.max_price,
        low: t.min_price,
        volume: t.stats.volume,
        quote_volume: t.stats.volume_usd,
        last_updated: millis_to_utc(t.timestamp),
    }));
    Ok(())
}

fn quote(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(segments, 2..=3, "quote.{instrument_name}")?;
    let (pair, asset) = ctx.lookup.resolve(segments[1])?;
    let q: DeribitQuote = decode(segments, raw)?;
    ctx.sink.emit(StreamEvent::Ticker(Ticker {
        pair,
        asset,
        bid: q.best_bid_price,
        ask: q.best_ask_price,
        bid_size: q.best_bid_amount,
        ask_size: q.best_ask_amount,
        last: None,
        high: None,
        low: None,
        volume: None,
        quote_volume: None,
        last_updated: millis_to_utc(q.timestamp),
    }));
    Ok(())
}

fn to_trade(ctx: &DeribitContext, t: DeribitTrade) -> Result<Trade, EngineError> {
    let (pair, asset) = ctx.lookup.resolve(&t.instrument_name)?;
    Ok(Trade {
        pair,
        asset,
        trade_id: t.trade_id,
        price: t.price,
        amount: t.amount,
        side: t.direction.parse::<OrderSide>().map_err(EngineError::malformed)?,
        timestamp: millis_to_utc(t.timestamp),
    })
}

/// Serves both `trades.*` and `user.trades.*`.
fn trades(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    if !ctx.trade_feed {
        trace!("trade feed disabled");
        return Ok(());
    }
    expect_segments(
        segments,
        3..=5,
        "trades.{instrument_name}.{interval} or trades.{kind}.{currency}.{interval}",
    )?;
    let list: Vec<DeribitTrade> = decode(segments, raw)?;
    if list.is_empty() {
        return Err(EngineError::malformed("empty list of trades"));
    }

    let trades = list
        .into_iter()
        .map(|t| to_trade(ctx, t))
        .collect::<Result<Vec<_>, _>>()?;
    for trade in trades {
        ctx.sink.emit(StreamEvent::Trade(trade));
    }
    Ok(())
}

fn to_order(ctx: &DeribitContext, o: DeribitOrder) -> Result<OrderDetail, EngineError> {
    let (pair, asset) = ctx.lookup.resolve(&o.instrument_name)?;
    Ok(OrderDetail {
        order_id: o.order_id,
        pair,
        asset,
        side: o.direction.parse::<OrderSide>().map_err(EngineError::malformed)?,
        order_type: o.order_type.parse::<OrderType>().map_err(EngineError::malformed)?,
        status: o.order_state.parse::<OrderStatus>().map_err(EngineError::malformed)?,
        price: o.price,
        amount: o.amount,
        filled_amount: o.filled_amount,
        remaining_amount: o.amount - o.filled_amount,
        created: millis_to_utc(o.creation_timestamp),
        last_updated: millis_to_utc(o.last_update_timestamp),
    })
}

/// Raw order channels push one object, aggregated ones an array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn user_orders(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(
        segments,
        4..=5,
        "user.orders.{instrument_name}.{interval} or user.orders.{kind}.{currency}.{interval}",
    )?;
    let orders = match decode::<OneOrMany<DeribitOrder>>(segments, raw)? {
        OneOrMany::Many(orders) => orders,
        OneOrMany::One(order) => vec![order],
    };
    let details = orders
        .into_iter()
        .map(|o| to_order(ctx, o))
        .collect::<Result<Vec<_>, _>>()?;
    ctx.sink.emit(StreamEvent::Orders(details));
    Ok(())
}

fn user_changes(ctx: &DeribitContext, segments: &[&str], raw: &RawValue) -> Result<(), EngineError> {
    expect_segments(
        segments,
        4..=5,
        "user.changes.{instrument_name}.{interval} or user.changes.{kind}.{currency}.{interval}",
    )?;
    let changes: DeribitChanges = decode(segments, raw)?;

    let trades = changes
        .trades
        .into_iter()
        .map(|t| to_trade(ctx, t))
        .collect::<Result<Vec<_>, _>>()?;
    let orders = changes
        .orders
        .into_iter()
        .map(|o| to_order(ctx, o))
        .collect::<Result<Vec<_>, _>>()?;

    if ctx.trade_feed {
        for trade in trades {
            ctx.sink.emit(StreamEvent::Trade(trade));
        }
    }
    ctx.sink.emit(StreamEvent::Orders(orders));
    ctx.sink.emit(StreamEvent::Positions(changes.positions));
    Ok(())
}
