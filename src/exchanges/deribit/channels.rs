use crate::core::errors::EngineError;
use crate::core::subscription::{keys, ChannelTemplate, Subscription};
use crate::core::types::{AssetClass, Interval, Pair};

pub const ANNOUNCEMENTS: &str = "announcements";
pub const BOOK: &str = "book";
pub const CHART_TRADES: &str = "chart.trades";
pub const PRICE_INDEX: &str = "deribit_price_index";
pub const PRICE_RANKING: &str = "deribit_price_ranking";
pub const PRICE_STATISTICS: &str = "deribit_price_statistics";
pub const VOLATILITY_INDEX: &str = "deribit_volatility_index";
pub const ESTIMATED_EXPIRATION_PRICE: &str = "estimated_expiration_price";
pub const INCREMENTAL_TICKER: &str = "incremental_ticker";
pub const INSTRUMENT_STATE: &str = "instrument.state";
pub const MARK_PRICE_OPTIONS: &str = "markprice.options";
pub const PERPETUAL: &str = "perpetual.";
pub const PLATFORM_STATE: &str = "platform_state";
pub const PLATFORM_STATE_PUBLIC_METHODS: &str = "platform_state.public_methods_state";
pub const QUOTE: &str = "quote";
pub const REQUEST_FOR_QUOTE: &str = "rfq";
pub const TICKER: &str = "ticker";
pub const TRADES: &str = "trades";

pub const USER_ACCESS_LOG: &str = "user.access_log";
pub const USER_CHANGES_INSTRUMENT: &str = "user.changes.";
pub const USER_CHANGES_CURRENCY: &str = "user.changes";
pub const USER_LOCK: &str = "user.lock";
pub const USER_MMP_TRIGGER: &str = "user.mmp_trigger";
pub const USER_ORDERS: &str = "user.orders";
pub const USER_TRADES: &str = "user.trades";
pub const USER_PORTFOLIO: &str = "user.portfolio";

/// Minute resolutions `chart.trades` accepts besides `1D`.
const CHART_MINUTES: [u32; 11] = [1, 3, 5, 10, 15, 30, 60, 120, 180, 360, 720];

/// Deribit's subscription naming rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeribitChannels;

impl DeribitChannels {
    fn name(channel: &str) -> Option<&'static str> {
        let name = match channel {
            keys::TICKER => TICKER,
            keys::ORDERBOOK => BOOK,
            keys::CANDLES => CHART_TRADES,
            keys::ALL_TRADES => TRADES,
            keys::MY_TRADES => USER_TRADES,
            keys::MY_ORDERS => USER_ORDERS,
            ANNOUNCEMENTS => ANNOUNCEMENTS,
            PRICE_INDEX => PRICE_INDEX,
            PRICE_RANKING => PRICE_RANKING,
            PRICE_STATISTICS => PRICE_STATISTICS,
            VOLATILITY_INDEX => VOLATILITY_INDEX,
            ESTIMATED_EXPIRATION_PRICE => ESTIMATED_EXPIRATION_PRICE,
            INCREMENTAL_TICKER => INCREMENTAL_TICKER,
            INSTRUMENT_STATE => INSTRUMENT_STATE,
            MARK_PRICE_OPTIONS => MARK_PRICE_OPTIONS,
            PERPETUAL => PERPETUAL,
            PLATFORM_STATE => PLATFORM_STATE,
            PLATFORM_STATE_PUBLIC_METHODS => PLATFORM_STATE_PUBLIC_METHODS,
            QUOTE => QUOTE,
            REQUEST_FOR_QUOTE => REQUEST_FOR_QUOTE,
            USER_ACCESS_LOG => USER_ACCESS_LOG,
            USER_CHANGES_INSTRUMENT => USER_CHANGES_INSTRUMENT,
            USER_CHANGES_CURRENCY => USER_CHANGES_CURRENCY,
            USER_LOCK => USER_LOCK,
            USER_MMP_TRIGGER => USER_MMP_TRIGGER,
            USER_PORTFOLIO => USER_PORTFOLIO,
            _ => return None,
        };
        Some(name)
    }
}

impl ChannelTemplate for DeribitChannels {
    fn channel_name(&self, sub: &Subscription) -> Result<&'static str, EngineError> {
        Self::name(&sub.channel).ok_or_else(|| {
            EngineError::InvalidSubscription(format!("channel not supported: {}", sub.channel))
        })
    }

    /// `chart.trades` takes `1D` or a minute count; everything else takes
    /// `raw`, `100ms` or `agg2` (the venue's roughly one second aggregation).
    fn channel_interval(&self, sub: &Subscription) -> Result<Option<String>, EngineError> {
        let Some(interval) = sub.interval else {
            return Ok(None);
        };
        let unsupported = || {
            EngineError::InvalidSubscription(format!(
                "interval {} not supported for {}",
                interval, sub.channel
            ))
        };

        if self.channel_name(sub)? == CHART_TRADES {
            if interval == Interval::Days1 {
                return Ok(Some("1D".to_string()));
            }
            return match interval.minutes() {
                Some(m) if CHART_MINUTES.contains(&m) => Ok(Some(m.to_string())),
                _ => Err(unsupported()),
            };
        }

        match interval {
            Interval::Seconds1 => Ok(Some("agg2".to_string())),
            Interval::Millis100 | Interval::Raw => Ok(Some(interval.short().to_string())),
            _ => Err(unsupported()),
        }
    }

    fn is_symbol_channel(&self, sub: &Subscription) -> Result<bool, EngineError> {
        Ok(matches!(
            self.channel_name(sub)?,
            BOOK | CHART_TRADES
                | TICKER
                | TRADES
                | PERPETUAL
                | QUOTE
                | USER_CHANGES_INSTRUMENT
                | INCREMENTAL_TICKER
                | USER_ORDERS
                | USER_TRADES
        ))
    }

    /// Linear perpetuals are spelled `BTC_USDC-PERPETUAL`.
    fn format_pair(&self, pair: &Pair) -> String {
        if pair.quote.contains("PERPETUAL") && pair.quote.contains('-') {
            pair.with_delimiter("_").to_string()
        } else {
            pair.to_string()
        }
    }
}

/// Subscriptions opened on connect.
pub fn default_subscriptions() -> Vec<Subscription> {
    vec![
        Subscription::new(keys::CANDLES).interval(Interval::Days1),
        // raw book updates need an authenticated session
        Subscription::new(keys::ORDERBOOK).interval(Interval::Millis100),
        Subscription::new(keys::TICKER).interval(Interval::Millis100),
        Subscription::new(keys::ALL_TRADES).interval(Interval::Millis100),
        Subscription::new(keys::MY_ORDERS)
            .interval(Interval::Millis100)
            .authenticated(),
        Subscription::new(keys::MY_TRADES)
            .interval(Interval::Millis100)
            .authenticated(),
    ]
}

const OPTION_COMBO_CODES: [&str; 10] = [
    "CS", "PS", "CCAL", "PCAL", "STRD", "STRG", "RR", "CBUT", "PBUT", "ICOND",
];

/// Derives pair and asset class from a Deribit instrument name, e.g.
/// `BTC-PERPETUAL`, `ETH-27DEC24-3000-C`, `BTC_USDC` or `BTC-FS-27DEC24_PERP`.
pub fn classify_instrument(name: &str) -> Result<(Pair, AssetClass), EngineError> {
    let dash = name.find('-');
    let underscore = name.find('_');
    let delimiter = match (underscore, dash) {
        (Some(u), Some(d)) if u < d => "_",
        (Some(_), None) => "_",
        _ => "-",
    };
    let pair = Pair::parse(name, delimiter)
        .map_err(|_| EngineError::UnknownInstrument(name.to_string()))?;

    let segments: Vec<&str> = name.split('-').collect();
    let asset = match segments.as_slice() {
        [_] => AssetClass::Spot,
        [_, "FS", ..] => AssetClass::FutureCombo,
        [_, code, ..] if OPTION_COMBO_CODES.contains(code) => AssetClass::OptionCombo,
        [_, _, _, "C" | "P"] => AssetClass::Options,
        _ => AssetClass::Futures,
    };
    Ok((pair, asset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruments::InstrumentRegistry;
    use crate::core::subscription::expand;

    #[test]
    fn test_channel_intervals() {
        let template = DeribitChannels;
        let candles = Subscription::new(keys::CANDLES).interval(Interval::Days1);
        assert_eq!(template.channel_interval(&candles).unwrap().as_deref(), Some("1D"));

        let hourly = Subscription::new(keys::CANDLES).interval(Interval::Hours1);
        assert_eq!(template.channel_interval(&hourly).unwrap().as_deref(), Some("60"));

        let weekly = Subscription::new(keys::CANDLES).interval(Interval::Weeks1);
        assert!(template.channel_interval(&weekly).is_err());

        let book = Subscription::new(keys::ORDERBOOK).interval(Interval::Seconds1);
        assert_eq!(template.channel_interval(&book).unwrap().as_deref(), Some("agg2"));

        let slow_book = Subscription::new(keys::ORDERBOOK).interval(Interval::Minutes1);
        assert!(matches!(
            template.channel_interval(&slow_book),
            Err(EngineError::InvalidSubscription(_))
        ));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        assert!(DeribitChannels
            .channel_name(&Subscription::new("user.unknown"))
            .is_err());
    }

    #[test]
    fn test_linear_perpetual_pair_format() {
        let template = DeribitChannels;
        let linear = Pair::new("BTC", "USDC-PERPETUAL", "-").unwrap();
        assert_eq!(template.format_pair(&linear), "BTC_USDC-PERPETUAL");
        let inverse = Pair::new("BTC", "PERPETUAL", "-").unwrap();
        assert_eq!(template.format_pair(&inverse), "BTC-PERPETUAL");
    }

    #[test]
    fn test_default_subscriptions_expand() {
        let registry = InstrumentRegistry::new();
        for name in ["BTC-PERPETUAL", "ETH-PERPETUAL"] {
            let (pair, asset) = classify_instrument(name).unwrap();
            registry.insert(name, pair, asset);
        }

        let expanded = expand(&default_subscriptions(), &DeribitChannels, &registry).unwrap();
        let channels: Vec<&str> = expanded.iter().map(Subscription::key).collect();
        assert_eq!(expanded.len(), 12);
        assert!(channels.contains(&"chart.trades.BTC-PERPETUAL.1D"));
        assert!(channels.contains(&"book.ETH-PERPETUAL.100ms"));
        assert!(channels.contains(&"user.orders.BTC-PERPETUAL.100ms"));
        assert_eq!(expanded.iter().filter(|s| s.authenticated).count(), 4);
    }

    #[test]
    fn test_perpetual_channel_trailing_dot() {
        let registry = InstrumentRegistry::new();
        let (pair, asset) = classify_instrument("BTC-PERPETUAL").unwrap();
        registry.insert("BTC-PERPETUAL", pair, asset);

        let list = vec![Subscription::new(PERPETUAL).interval(Interval::Millis100)];
        let expanded = expand(&list, &DeribitChannels, &registry).unwrap();
        assert_eq!(expanded[0].key(), "perpetual.BTC-PERPETUAL.100ms");
    }

    #[test]
    fn test_classify_instrument() {
        let cases = [
            ("BTC-PERPETUAL", AssetClass::Futures, "BTC-PERPETUAL"),
            ("BTC-27DEC24", AssetClass::Futures, "BTC-27DEC24"),
            ("ETH-27DEC24-3000-C", AssetClass::Options, "ETH-27DEC24-3000-C"),
            ("BTC_USDC", AssetClass::Spot, "BTC_USDC"),
            ("BTC_USDC-PERPETUAL", AssetClass::Futures, "BTC_USDC-PERPETUAL"),
            ("BTC-FS-27DEC24_PERP", AssetClass::FutureCombo, "BTC-FS-27DEC24_PERP"),
            ("ETH-CS-27DEC24-3000_3500", AssetClass::OptionCombo, "ETH-CS-27DEC24-3000_3500"),
        ];
        for (name, asset, display) in cases {
            let (pair, class) = classify_instrument(name).unwrap();
            assert_eq!(class, asset, "{}", name);
            assert_eq!(pair.to_string(), display);
        }
        assert!(classify_instrument("BTC").is_err());
    }
}
