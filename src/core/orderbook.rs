use crate::core::errors::EngineError;
use crate::core::types::{AssetClass, Level, OrderBookDelta, OrderBookSnapshot, Pair};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

type BookKey = (Pair, AssetClass);

#[derive(Debug, Clone)]
struct BookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    last_updated: DateTime<Utc>,
}

impl BookState {
    fn to_snapshot(&self, pair: &Pair, asset: AssetClass) -> OrderBookSnapshot {
        OrderBookSnapshot {
            pair: pair.clone(),
            asset,
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(p, a)| Level::new(*p, *a))
                .collect(),
            asks: self.asks.iter().map(|(p, a)| Level::new(*p, *a)).collect(),
            update_id: self.last_update_id,
            last_updated: self.last_updated,
        }
    }
}

/// Order books for every `(pair, asset)` the venue streams.
///
/// Thread-safe and cheap to clone. Every mutation validates first and then
/// applies under a single write guard, so readers observe either the state
/// before an update or after it.
#[derive(Debug, Clone, Default)]
pub struct OrderBookStore {
    books: Arc<RwLock<HashMap<BookKey, BookState>>>,
}

fn check_levels(levels: &[Level], side: &str, pair: &Pair) -> Result<(), EngineError> {
    match levels
        .iter()
        .find(|l| l.price.is_sign_negative() || l.amount.is_sign_negative())
    {
        Some(level) => Err(EngineError::malformed(format!(
            "{} {} level has negative value: price {} amount {}",
            pair, side, level.price, level.amount
        ))),
        None => Ok(()),
    }
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored book. Zero-price and zero-amount levels are
    /// dropped; a snapshot left with no levels at all changes nothing.
    pub fn load_snapshot(&self, snapshot: &OrderBookSnapshot) -> Result<(), EngineError> {
        check_levels(&snapshot.bids, "bid", &snapshot.pair)?;
        check_levels(&snapshot.asks, "ask", &snapshot.pair)?;

        let keep = |l: &&Level| !l.price.is_zero() && !l.amount.is_zero();
        let bids: BTreeMap<Decimal, Decimal> = snapshot
            .bids
            .iter()
            .filter(keep)
            .map(|l| (l.price, l.amount))
            .collect();
        let asks: BTreeMap<Decimal, Decimal> = snapshot
            .asks
            .iter()
            .filter(keep)
            .map(|l| (l.price, l.amount))
            .collect();

        if bids.is_empty() && asks.is_empty() {
            debug!(pair = %snapshot.pair, asset = %snapshot.asset, "empty snapshot ignored");
            return Ok(());
        }

        let state = BookState {
            bids,
            asks,
            last_update_id: snapshot.update_id,
            last_updated: snapshot.last_updated,
        };
        self.books
            .write()
            .insert((snapshot.pair.clone(), snapshot.asset), state);
        Ok(())
    }

    /// Applies a delta: amount 0 deletes the level, anything else upserts.
    pub fn apply_update(&self, delta: &OrderBookDelta) -> Result<(), EngineError> {
        check_levels(&delta.bids, "bid", &delta.pair)?;
        check_levels(&delta.asks, "ask", &delta.pair)?;

        let bids: Vec<&Level> = delta.bids.iter().filter(|l| !l.price.is_zero()).collect();
        let asks: Vec<&Level> = delta.asks.iter().filter(|l| !l.price.is_zero()).collect();
        if bids.is_empty() && asks.is_empty() {
            return Ok(());
        }

        let mut books = self.books.write();
        let state = books
            .get_mut(&(delta.pair.clone(), delta.asset))
            .ok_or_else(|| EngineError::OrderbookNotFound {
                pair: delta.pair.to_string(),
                asset: delta.asset.to_string(),
            })?;

        let desync = |received: u64| EngineError::Desynchronization {
            pair: delta.pair.to_string(),
            asset: delta.asset.to_string(),
            stored: state.last_update_id,
            received,
        };
        if delta.update_id <= state.last_update_id {
            let err = desync(delta.update_id);
            warn!("{}", err);
            return Err(err);
        }
        if let Some(previous) = delta.previous_update_id {
            if previous != state.last_update_id {
                let err = desync(previous);
                warn!("{}", err);
                return Err(err);
            }
        }

        for level in bids {
            upsert(&mut state.bids, level);
        }
        for level in asks {
            upsert(&mut state.asks, level);
        }
        state.last_update_id = delta.update_id;
        state.last_updated = delta.update_time;
        Ok(())
    }

    /// Consistent copy of one book: bids best first, asks best first.
    pub fn book(&self, pair: &Pair, asset: AssetClass) -> Result<OrderBookSnapshot, EngineError> {
        self.books
            .read()
            .get(&(pair.clone(), asset))
            .map(|state| state.to_snapshot(pair, asset))
            .ok_or_else(|| EngineError::OrderbookNotFound {
                pair: pair.to_string(),
                asset: asset.to_string(),
            })
    }

    pub fn best_bid(&self, pair: &Pair, asset: AssetClass) -> Option<Level> {
        self.books
            .read()
            .get(&(pair.clone(), asset))
            .and_then(|s| s.bids.iter().next_back().map(|(p, a)| Level::new(*p, *a)))
    }

    pub fn best_ask(&self, pair: &Pair, asset: AssetClass) -> Option<Level> {
        self.books
            .read()
            .get(&(pair.clone(), asset))
            .and_then(|s| s.asks.iter().next().map(|(p, a)| Level::new(*p, *a)))
    }

    pub fn last_update_id(&self, pair: &Pair, asset: AssetClass) -> Option<u64> {
        self.books
            .read()
            .get(&(pair.clone(), asset))
            .map(|s| s.last_update_id)
    }

    /// Drops a book so the next snapshot seeds it again. Returns whether a
    /// book was present.
    pub fn invalidate(&self, pair: &Pair, asset: AssetClass) -> bool {
        self.books.write().remove(&(pair.clone(), asset)).is_some()
    }

    pub fn clear(&self) {
        self.books.write().clear();
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}

fn upsert(side: &mut BTreeMap<Decimal, Decimal>, level: &Level) {
    if level.amount.is_zero() {
        side.remove(&level.price);
    } else {
        side.insert(level.price, level.amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> Pair {
        Pair::parse("BTC-PERPETUAL", "-").unwrap()
    }

    fn snapshot(bids: Vec<Level>, asks: Vec<Level>, update_id: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            pair: pair(),
            asset: AssetClass::Futures,
            bids,
            asks,
            update_id,
            last_updated: Utc::now(),
        }
    }

    fn delta(bids: Vec<Level>, asks: Vec<Level>, update_id: u64) -> OrderBookDelta {
        OrderBookDelta {
            pair: pair(),
            asset: AssetClass::Futures,
            bids,
            asks,
            update_id,
            previous_update_id: None,
            update_time: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_then_delta() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(
                vec![Level::new(dec!(100), dec!(1))],
                vec![Level::new(dec!(101), dec!(2))],
                1,
            ))
            .unwrap();

        store
            .apply_update(&delta(
                vec![Level::new(dec!(100), dec!(0)), Level::new(dec!(99), dec!(3))],
                vec![],
                2,
            ))
            .unwrap();

        let book = store.book(&pair(), AssetClass::Futures).unwrap();
        assert_eq!(book.bids, vec![Level::new(dec!(99), dec!(3))]);
        assert_eq!(book.asks, vec![Level::new(dec!(101), dec!(2))]);
        assert_eq!(book.update_id, 2);
    }

    #[test]
    fn test_non_increasing_update_is_rejected() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(vec![Level::new(dec!(100), dec!(1))], vec![], 5))
            .unwrap();

        let err = store
            .apply_update(&delta(vec![Level::new(dec!(98), dec!(1))], vec![], 5))
            .unwrap_err();
        match err {
            EngineError::Desynchronization {
                stored, received, ..
            } => {
                assert_eq!(stored, 5);
                assert_eq!(received, 5);
            }
            other => panic!("Expected desynchronization, got {:?}", other),
        }

        let book = store.book(&pair(), AssetClass::Futures).unwrap();
        assert_eq!(book.bids, vec![Level::new(dec!(100), dec!(1))]);
        assert_eq!(book.update_id, 5);
    }

    #[test]
    fn test_previous_id_gap_is_rejected() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(vec![Level::new(dec!(100), dec!(1))], vec![], 5))
            .unwrap();

        let mut gap = delta(vec![Level::new(dec!(98), dec!(1))], vec![], 8);
        gap.previous_update_id = Some(7);
        assert!(matches!(
            store.apply_update(&gap),
            Err(EngineError::Desynchronization { .. })
        ));

        gap.previous_update_id = Some(5);
        store.apply_update(&gap).unwrap();
        assert_eq!(store.last_update_id(&pair(), AssetClass::Futures), Some(8));
    }

    #[test]
    fn test_zero_price_levels_filtered() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(
                vec![Level::new(dec!(0), dec!(5)), Level::new(dec!(100), dec!(1))],
                vec![Level::new(dec!(101), dec!(0))],
                1,
            ))
            .unwrap();

        let book = store.book(&pair(), AssetClass::Futures).unwrap();
        assert_eq!(book.bids, vec![Level::new(dec!(100), dec!(1))]);
        assert!(book.asks.is_empty());
    }

    #[test]
    fn test_empty_frames_are_noops() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(vec![Level::new(dec!(0), dec!(1))], vec![], 1))
            .unwrap();
        assert!(store.is_empty());

        // nothing to apply, so a missing book is not an error either
        store
            .apply_update(&delta(vec![Level::new(dec!(0), dec!(1))], vec![], 2))
            .unwrap();
    }

    #[test]
    fn test_update_without_snapshot() {
        let store = OrderBookStore::new();
        assert!(matches!(
            store.apply_update(&delta(vec![Level::new(dec!(1), dec!(1))], vec![], 1)),
            Err(EngineError::OrderbookNotFound { .. })
        ));
    }

    #[test]
    fn test_negative_values_rejected() {
        let store = OrderBookStore::new();
        assert!(matches!(
            store.load_snapshot(&snapshot(vec![Level::new(dec!(100), dec!(-1))], vec![], 1)),
            Err(EngineError::MalformedData(_))
        ));
    }

    #[test]
    fn test_best_levels_and_invalidate() {
        let store = OrderBookStore::new();
        store
            .load_snapshot(&snapshot(
                vec![Level::new(dec!(99), dec!(1)), Level::new(dec!(100), dec!(2))],
                vec![Level::new(dec!(102), dec!(1)), Level::new(dec!(101), dec!(4))],
                1,
            ))
            .unwrap();

        assert_eq!(
            store.best_bid(&pair(), AssetClass::Futures),
            Some(Level::new(dec!(100), dec!(2)))
        );
        assert_eq!(
            store.best_ask(&pair(), AssetClass::Futures),
            Some(Level::new(dec!(101), dec!(4)))
        );
        assert!(store.best_bid(&pair(), AssetClass::Options).is_none());

        assert!(store.invalidate(&pair(), AssetClass::Futures));
        assert!(!store.invalidate(&pair(), AssetClass::Futures));
        assert!(store.book(&pair(), AssetClass::Futures).is_err());
    }
}
