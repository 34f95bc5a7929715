// src/venue/mod.rs
pub mod binance;
pub mod nobitex;
pub mod wallex;

use crate::domain::errors::{AppError, AppResult, ExecutionResult};
use crate::domain::models::{OrderRequest, OrderState};
use crate::feed::book_store::BookStore;
use crate::feed::FeedHealth;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Order placement capability of a target venue.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn venue(&self) -> &str;

    /// Place an order; returns the venue order id.
    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<String>;

    async fn get_order(&self, order_id: &str) -> ExecutionResult<OrderState>;

    async fn cancel_order(&self, order_id: &str) -> ExecutionResult<()>;

    /// Free (spendable) balance for an asset.
    async fn get_balance(&self, asset: &str) -> ExecutionResult<Decimal>;
}

/// One reference symbol's footprint on a target venue, precomputed by the
/// external symbol-discovery tooling. The core never recomputes this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolPair {
    pub base_asset: String,
    pub tmn_symbol: Option<String>,
    pub usdt_symbol: Option<String>,
    pub amount_precision: u32,
    pub price_precision: u32,
}

/// Static reference-symbol -> venue-symbol mapping for one target venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMapping {
    entries: BTreeMap<String, SymbolPair>,
}

impl SymbolMapping {
    pub fn new(entries: BTreeMap<String, SymbolPair>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &SymbolPair)> {
        self.entries.iter()
    }

    pub fn get(&self, reference_symbol: &str) -> Option<&SymbolPair> {
        self.entries.get(reference_symbol)
    }

    /// Order-formatting precision for a reference symbol.
    pub fn precision(&self, reference_symbol: &str) -> Option<(u32, u32)> {
        self.entries
            .get(reference_symbol)
            .map(|p| (p.amount_precision, p.price_precision))
    }

    /// Every venue-local symbol this mapping covers (both quote forms).
    pub fn venue_symbols(&self) -> Vec<String> {
        self.entries
            .values()
            .flat_map(|p| {
                p.tmn_symbol
                    .iter()
                    .chain(p.usdt_symbol.iter())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn reference_symbols(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-venue mappings, loaded from the precomputed JSON file or from the
/// built-in defaults covering the majors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMappings {
    pub wallex: SymbolMapping,
    pub nobitex: SymbolMapping,
}

impl VenueMappings {
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                log::info!("No symbol map file configured, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(&path).map_err(|e| {
            AppError::Config(format!("Failed to open symbol map file: {}", e))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            AppError::Config(format!("Failed to read symbol map file: {}", e))
        })?;

        let mappings: VenueMappings = serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse symbol map file: {}", e))
        })?;

        Ok(mappings)
    }

    /// Union of reference symbols across all target venues; this is the set
    /// the reference feed subscribes to.
    pub fn reference_symbols(&self) -> Vec<String> {
        let mut symbols = BTreeSet::new();
        symbols.extend(self.wallex.reference_symbols());
        symbols.extend(self.nobitex.reference_symbols());
        symbols.into_iter().collect()
    }
}

impl Default for VenueMappings {
    fn default() -> Self {
        // (reference symbol, base asset, amount precision, price precision)
        let majors = [
            ("BTCUSDT", "BTC", 6, 0),
            ("ETHUSDT", "ETH", 5, 0),
            ("XRPUSDT", "XRP", 1, 0),
            ("ADAUSDT", "ADA", 1, 0),
            ("DOGEUSDT", "DOGE", 0, 0),
            ("LTCUSDT", "LTC", 4, 0),
            ("TRXUSDT", "TRX", 0, 0),
        ];

        let entries: BTreeMap<String, SymbolPair> = majors
            .iter()
            .map(|(reference, base, amount_precision, price_precision)| {
                (
                    reference.to_string(),
                    SymbolPair {
                        base_asset: base.to_string(),
                        tmn_symbol: Some(format!("{}TMN", base)),
                        usdt_symbol: Some(format!("{}USDT", base)),
                        amount_precision: *amount_precision,
                        price_precision: *price_precision,
                    },
                )
            })
            .collect();

        let mapping = SymbolMapping::new(entries);
        Self {
            wallex: mapping.clone(),
            nobitex: mapping,
        }
    }
}

/// Everything the generic pipeline needs from one target venue: the symbol
/// mapping, the live book cache, the order gateway, and feed health. Each
/// venue supplies one of these instead of its own copy of the pipeline.
pub struct TargetVenue {
    pub name: String,
    pub mapping: SymbolMapping,
    pub books: Arc<BookStore>,
    pub gateway: Arc<dyn OrderGateway>,
    pub health: Arc<FeedHealth>,
}

impl TargetVenue {
    pub fn is_connected(&self) -> bool {
        self.health.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_mapping_covers_both_quote_forms() {
        let mappings = VenueMappings::default();
        let pair = mappings.wallex.get("BTCUSDT").unwrap();
        assert_eq!(pair.tmn_symbol.as_deref(), Some("BTCTMN"));
        assert_eq!(pair.usdt_symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(mappings.wallex.precision("BTCUSDT"), Some((6, 0)));
        assert_eq!(mappings.wallex.precision("NOPEUSDT"), None);
    }

    #[test]
    fn reference_symbols_are_deduplicated_union() {
        let mappings = VenueMappings::default();
        let symbols = mappings.reference_symbols();
        assert_eq!(symbols.len(), mappings.wallex.len());
        assert!(symbols.contains(&"BTCUSDT".to_string()));
    }

    #[test]
    fn venue_symbols_flatten_both_forms() {
        let mappings = VenueMappings::default();
        let symbols = mappings.nobitex.venue_symbols();
        assert!(symbols.contains(&"BTCTMN".to_string()));
        assert!(symbols.contains(&"BTCUSDT".to_string()));
        assert_eq!(symbols.len(), mappings.nobitex.len() * 2);
    }
}
