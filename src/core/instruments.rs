use crate::core::errors::EngineError;
use crate::core::traits::InstrumentLookup;
use crate::core::types::{AssetClass, AssetScope, Pair};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct Instrument {
    pair: Pair,
    asset: AssetClass,
    enabled: bool,
}

/// In-memory instrument table keyed by the venue's instrument name.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: RwLock<HashMap<String, Instrument>>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an enabled instrument.
    pub fn insert(&self, name: impl Into<String>, pair: Pair, asset: AssetClass) {
        self.instruments.write().insert(
            name.into(),
            Instrument {
                pair,
                asset,
                enabled: true,
            },
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        self.instruments.write().remove(name).is_some()
    }

    /// Disabled instruments still resolve but are left out of expansion.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.instruments.write().get_mut(name) {
            Some(instrument) => {
                instrument.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.read().is_empty()
    }
}

impl InstrumentLookup for InstrumentRegistry {
    fn resolve(&self, instrument: &str) -> Result<(Pair, AssetClass), EngineError> {
        self.instruments
            .read()
            .get(instrument)
            .map(|i| (i.pair.clone(), i.asset))
            .ok_or_else(|| EngineError::UnknownInstrument(instrument.to_string()))
    }

    fn asset_pairs(&self, scope: &AssetScope) -> Vec<(AssetClass, Vec<Pair>)> {
        let mut grouped: BTreeMap<AssetClass, Vec<Pair>> = BTreeMap::new();
        for instrument in self.instruments.read().values() {
            if instrument.enabled && scope.contains(instrument.asset) {
                grouped
                    .entry(instrument.asset)
                    .or_default()
                    .push(instrument.pair.clone());
            }
        }
        grouped
            .into_iter()
            .map(|(asset, mut pairs)| {
                pairs.sort();
                (asset, pairs)
            })
            .collect()
    }
}
