use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Decimal that may arrive as a number, a numeric string or a marker such
/// as `"market_price"`; anything non-numeric becomes `None`.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Some(Value::String(s)) => Decimal::from_str(&s).ok(),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
pub struct DeribitAuthParams {
    pub grant_type: &'static str,
    pub client_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeribitAuthResult {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// `book.*` notification. Level rows are decoded by the handler because
/// their shape depends on the channel.
#[derive(Debug, Deserialize)]
pub struct DeribitOrderbook {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub timestamp: i64,
    pub instrument_name: String,
    pub change_id: u64,
    #[serde(default)]
    pub prev_change_id: Option<u64>,
    #[serde(default)]
    pub bids: Vec<Vec<Value>>,
    #[serde(default)]
    pub asks: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeribitTickerStats {
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub high: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub low: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume_usd: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price_change: Option<Decimal>,
}

/// Shared by `ticker.*` and `incremental_ticker.*`; incremental frames
/// carry only the fields that changed.
#[derive(Debug, Deserialize)]
pub struct DeribitTicker {
    pub timestamp: i64,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub last_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub mark_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub min_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub max_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub implied_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub implied_ask: Option<Decimal>,
    #[serde(default)]
    pub stats: DeribitTickerStats,
}

#[derive(Debug, Deserialize)]
pub struct DeribitQuote {
    pub timestamp: i64,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct DeribitTrade {
    pub trade_id: String,
    pub instrument_name: String,
    pub timestamp: i64,
    pub price: Decimal,
    pub amount: Decimal,
    pub direction: String,
    #[serde(default)]
    pub trade_seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeribitCandle {
    pub tick: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub cost: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct DeribitOrder {
    pub order_id: String,
    pub instrument_name: String,
    pub order_type: String,
    pub order_state: String,
    pub direction: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    pub amount: Decimal,
    #[serde(default)]
    pub filled_amount: Decimal,
    pub creation_timestamp: i64,
    pub last_update_timestamp: i64,
}

/// `user.changes.*` notification.
#[derive(Debug, Deserialize)]
pub struct DeribitChanges {
    #[serde(default)]
    pub trades: Vec<DeribitTrade>,
    #[serde(default)]
    pub orders: Vec<DeribitOrder>,
    #[serde(default)]
    pub positions: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_market_price_marker() {
        let order: DeribitOrder = serde_json::from_str(
            r#"{"order_id":"1","instrument_name":"BTC-PERPETUAL","order_type":"market",
                "order_state":"filled","direction":"buy","price":"market_price",
                "amount":10,"filled_amount":10,"creation_timestamp":1,"last_update_timestamp":2}"#,
        )
        .unwrap();
        assert_eq!(order.price, None);
        assert_eq!(order.amount, dec!(10));
    }

    #[test]
    fn test_incremental_ticker_partial_fields() {
        let ticker: DeribitTicker =
            serde_json::from_str(r#"{"timestamp":1,"best_bid_price":42000.5,"stats":{"volume":1.25}}"#)
                .unwrap();
        assert_eq!(ticker.best_bid_price, Some(dec!(42000.5)));
        assert_eq!(ticker.best_ask_price, None);
        assert_eq!(ticker.stats.volume, Some(dec!(1.25)));
    }
}
