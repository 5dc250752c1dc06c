use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid pair: {0}")]
    InvalidPair(String),
    #[error("Unknown asset class: {0}")]
    UnknownAsset(String),
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Instrument family a pair trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Spot,
    Futures,
    Options,
    FutureCombo,
    OptionCombo,
}

impl AssetClass {
    pub const ALL: [Self; 5] = [
        Self::Spot,
        Self::Futures,
        Self::Options,
        Self::FutureCombo,
        Self::OptionCombo,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
            Self::Options => "options",
            Self::FutureCombo => "future_combo",
            Self::OptionCombo => "option_combo",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypesError::UnknownAsset(s.to_string()))
    }
}

/// Which asset classes a subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssetScope {
    #[default]
    All,
    Only(Vec<AssetClass>),
}

impl AssetScope {
    pub fn contains(&self, asset: AssetClass) -> bool {
        match self {
            Self::All => true,
            Self::Only(assets) => assets.contains(&asset),
        }
    }
}

impl From<AssetClass> for AssetScope {
    fn from(asset: AssetClass) -> Self {
        Self::Only(vec![asset])
    }
}

/// A tradable pair. The delimiter is part of the venue spelling, so
/// `BTC-PERPETUAL` and `BTC_USDC` round-trip through `Display`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
    pub delimiter: String,
}

impl Pair {
    pub fn new(
        base: impl Into<String>,
        quote: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Result<Self, TypesError> {
        let base = base.into();
        let quote = quote.into();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidPair(
                "Base and quote cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            base,
            quote,
            delimiter: delimiter.into(),
        })
    }

    /// Split on the first occurrence of `delimiter`.
    pub fn parse(symbol: &str, delimiter: &str) -> Result<Self, TypesError> {
        let (base, quote) = symbol
            .split_once(delimiter)
            .ok_or_else(|| TypesError::InvalidPair(symbol.to_string()))?;
        Self::new(base, quote, delimiter)
    }

    #[must_use]
    pub fn with_delimiter(&self, delimiter: &str) -> Self {
        Self {
            base: self.base.clone(),
            quote: self.quote.clone(),
            delimiter: delimiter.to_string(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.base, self.delimiter, self.quote)
    }
}

/// Subscription interval. Which ones a channel accepts is venue specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Raw,
    Millis100,
    Seconds1,
    Minutes1,
    Minutes3,
    Minutes5,
    Minutes10,
    Minutes15,
    Minutes30,
    Hours1,
    Hours2,
    Hours3,
    Hours6,
    Hours12,
    Days1,
    Weeks1,
}

impl Interval {
    /// Length in whole minutes; `None` for sub-minute intervals.
    pub const fn minutes(&self) -> Option<u32> {
        match self {
            Self::Raw | Self::Millis100 | Self::Seconds1 => None,
            Self::Minutes1 => Some(1),
            Self::Minutes3 => Some(3),
            Self::Minutes5 => Some(5),
            Self::Minutes10 => Some(10),
            Self::Minutes15 => Some(15),
            Self::Minutes30 => Some(30),
            Self::Hours1 => Some(60),
            Self::Hours2 => Some(120),
            Self::Hours3 => Some(180),
            Self::Hours6 => Some(360),
            Self::Hours12 => Some(720),
            Self::Days1 => Some(1440),
            Self::Weeks1 => Some(10080),
        }
    }

    pub const fn short(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Millis100 => "100ms",
            Self::Seconds1 => "1s",
            Self::Minutes1 => "1m",
            Self::Minutes3 => "3m",
            Self::Minutes5 => "5m",
            Self::Minutes10 => "10m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hours1 => "1h",
            Self::Hours2 => "2h",
            Self::Hours3 => "3h",
            Self::Hours6 => "6h",
            Self::Hours12 => "12h",
            Self::Days1 => "1d",
            Self::Weeks1 => "1w",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl Level {
    pub const fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub pair: Pair,
    pub asset: AssetClass,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub update_id: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub pair: Pair,
    pub asset: AssetClass,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub update_id: u64,
    /// Update id the venue says this delta follows, when it publishes one.
    pub previous_update_id: Option<u64>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl FromStr for OrderSide {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(TypesError::UnknownVariant {
                kind: "order side",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
    TakeMarket,
    TakeLimit,
    TrailingStop,
    MarketLimit,
    Liquidation,
}

impl FromStr for OrderType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(Self::Market),
            "limit" => Ok(Self::Limit),
            "stop_market" => Ok(Self::StopMarket),
            "stop_limit" => Ok(Self::StopLimit),
            "take_market" => Ok(Self::TakeMarket),
            "take_limit" => Ok(Self::TakeLimit),
            "trailing_stop" => Ok(Self::TrailingStop),
            "market_limit" => Ok(Self::MarketLimit),
            "liquidation" => Ok(Self::Liquidation),
            _ => Err(TypesError::UnknownVariant {
                kind: "order type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Rejected,
    Cancelled,
    Untriggered,
    Triggered,
}

impl FromStr for OrderStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "filled" => Ok(Self::Filled),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "untriggered" => Ok(Self::Untriggered),
            "triggered" => Ok(Self::Triggered),
            _ => Err(TypesError::UnknownVariant {
                kind: "order status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub pair: Pair,
    pub asset: AssetClass,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub last: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub pair: Pair,
    pub asset: AssetClass,
    pub trade_id: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: OrderSide,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub pair: Pair,
    pub asset: AssetClass,
    pub resolution: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_id: String,
    pub pair: Pair,
    pub asset: AssetClass,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub remaining_amount: Decimal,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Everything the read loop emits to consumers, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    BookSnapshot(OrderBookSnapshot),
    BookUpdate(OrderBookDelta),
    Ticker(Ticker),
    Trade(Trade),
    Kline(Kline),
    Orders(Vec<OrderDetail>),
    Positions(Value),
    /// Channels decoded no further than JSON.
    Data { channel: String, payload: Value },
    Warning(String),
    Error(crate::core::errors::EngineError),
    Disconnected,
}

/// Venue millisecond timestamp to UTC; out-of-range values clamp to the epoch.
pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
