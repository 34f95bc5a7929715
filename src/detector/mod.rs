// src/detector/mod.rs
use crate::domain::models::{
    ArbitrageRow, ComparisonKind, NormalizedOrderBook, percent_gap,
};
use crate::feed::book_store::BookStore;
use crate::feed::rate::RateNormalizer;
use crate::venue::TargetVenue;
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Rows at or above this percent are forwarded to execution.
    pub min_execution_percent: Decimal,
    /// Rows below this notional (TMN) are discarded as illiquid noise.
    pub min_notional_tmn: Decimal,
    /// How many rows the latest snapshot exposes.
    pub snapshot_len: usize,
}

/// Result of one detection cycle against one target venue.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// Top rows, sorted descending by percent, for the broadcast sink.
    pub snapshot: Vec<ArbitrageRow>,
    /// Every emitted row, sorted descending; all of it folds into the
    /// tracker so rarer gaps still build history.
    pub all_rows: Vec<ArbitrageRow>,
    /// Rows that cleared the execution threshold.
    pub candidates: Vec<ArbitrageRow>,
}

/// Compares the reference venue's books against one target venue's books,
/// symbol by symbol, and emits ranked opportunity rows.
pub struct OpportunityDetector {
    reference: Arc<BookStore>,
    rate: Arc<RateNormalizer>,
    settings: DetectorSettings,
}

impl OpportunityDetector {
    pub fn new(
        reference: Arc<BookStore>,
        rate: Arc<RateNormalizer>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            reference,
            rate,
            settings,
        }
    }

    /// Run one detection cycle. Reads only in-memory book caches; venues
    /// whose feeds are behind simply contribute stale or absent books.
    pub fn detect(&self, venue: &TargetVenue) -> CycleOutput {
        let mut rows = Vec::new();

        for (reference_symbol, pair) in venue.mapping.entries() {
            let Some(reference_book) = self.reference.top_of_book(reference_symbol) else {
                continue;
            };
            if !reference_book.is_valid() {
                log::debug!("skipping {}: crossed reference book", reference_symbol);
                continue;
            }

            if let Some(symbol) = &pair.tmn_symbol {
                if let Some(target_book) = venue.books.top_of_book(symbol) {
                    if let Some(row) = self.compare(
                        reference_symbol,
                        &reference_book,
                        &target_book,
                        ComparisonKind::UsdtToTmn,
                        &venue.name,
                    ) {
                        rows.push(row);
                    }
                }
            }

            if let Some(symbol) = &pair.usdt_symbol {
                if let Some(target_book) = venue.books.top_of_book(symbol) {
                    if let Some(row) = self.compare(
                        reference_symbol,
                        &reference_book,
                        &target_book,
                        ComparisonKind::UsdtToUsdt,
                        &venue.name,
                    ) {
                        rows.push(row);
                    }
                }
            }
        }

        rows.sort_by(|a, b| b.percent_diff.cmp(&a.percent_diff));

        let snapshot = rows
            .iter()
            .take(self.settings.snapshot_len)
            .cloned()
            .collect();
        let candidates = rows
            .iter()
            .filter(|r| r.percent_diff >= self.settings.min_execution_percent)
            .cloned()
            .collect();

        CycleOutput {
            snapshot,
            all_rows: rows,
            candidates,
        }
    }

    /// Compare one reference book against one target book. The candidate
    /// direction is buy-low on the target: its ask must sit below the
    /// reference bid expressed in the target's quote terms.
    fn compare(
        &self,
        reference_symbol: &str,
        reference_book: &NormalizedOrderBook,
        target_book: &NormalizedOrderBook,
        kind: ComparisonKind,
        venue_name: &str,
    ) -> Option<ArbitrageRow> {
        if !target_book.is_valid() {
            log::debug!(
                "skipping {} on {}: crossed target book",
                target_book.symbol,
                venue_name
            );
            return None;
        }

        let reference_price = match kind {
            ComparisonKind::UsdtToTmn => self.rate.usdt_to_tmn(reference_book.bid.price),
            ComparisonKind::UsdtToUsdt => reference_book.bid.price,
        };

        let ask = target_book.ask;
        if ask.price >= reference_price {
            return None;
        }

        let percent = percent_gap(ask.price, reference_price);

        let notional_tmn = match kind {
            ComparisonKind::UsdtToTmn => ask.quantity * ask.price,
            ComparisonKind::UsdtToUsdt => self.rate.usdt_to_tmn(ask.quantity * ask.price),
        };
        if notional_tmn < self.settings.min_notional_tmn {
            return None;
        }

        let description = format!(
            "{}: {} ask {} {} vs reference {} ({}% gap, {} available)",
            reference_symbol,
            venue_name,
            ask.price,
            target_book.quote_currency.as_str(),
            reference_price,
            percent,
            ask.quantity,
        );

        Some(ArbitrageRow {
            symbol: reference_symbol.to_string(),
            percent_diff: percent,
            buy_price: ask.price,
            sell_price: reference_price,
            quantity: ask.quantity,
            notional_value: notional_tmn,
            comparison_kind: kind,
            venue: venue_name.to_string(),
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OrderBookSide, QuoteCurrency};
    use crate::testing::{fake_venue, usdt_book};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn detector(reference: Arc<BookStore>, rate: Arc<RateNormalizer>) -> OpportunityDetector {
        OpportunityDetector::new(
            reference,
            rate,
            DetectorSettings {
                min_execution_percent: dec!(2.2),
                min_notional_tmn: dec!(500000),
                snapshot_len: 10,
            },
        )
    }

    fn tmn_book(symbol: &str, bid: Decimal, ask: Decimal, qty: Decimal) -> NormalizedOrderBook {
        NormalizedOrderBook {
            venue: "wallex".to_string(),
            symbol: symbol.to_string(),
            bid: OrderBookSide::new(bid, qty),
            ask: OrderBookSide::new(ask, qty),
            quote_currency: QuoteCurrency::Tmn,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn emits_row_with_floor_truncated_percent() {
        let reference = Arc::new(BookStore::new("binance"));
        // rate of 1 keeps TMN numbers equal to USDT numbers
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let venue = fake_venue("wallex");

        reference.upsert(usdt_book("BTCUSDT", dec!(100), dec!(101), dec!(10)));
        venue
            .books
            .upsert(tmn_book("BTCTMN", dec!(93), dec!(94), dec!(10000)));

        let output = detector(reference, rate).detect(&venue);

        assert_eq!(output.all_rows.len(), 1);
        let row = &output.all_rows[0];
        // (100 - 94) / 94 * 100 = 6.3829... -> 6.38, truncated
        assert_eq!(row.percent_diff, dec!(6.38));
        assert_eq!(row.buy_price, dec!(94));
        assert_eq!(row.sell_price, dec!(100));
        assert_eq!(row.comparison_kind, ComparisonKind::UsdtToTmn);
        // 6.38 clears the 2.2 execution threshold
        assert_eq!(output.candidates.len(), 1);
    }

    #[test]
    fn skips_crossed_books_on_either_side() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let venue = fake_venue("wallex");

        // crossed reference book
        reference.upsert(usdt_book("BTCUSDT", dec!(101), dec!(100), dec!(10)));
        venue
            .books
            .upsert(tmn_book("BTCTMN", dec!(93), dec!(94), dec!(10000)));

        // crossed target book under a valid reference
        reference.upsert(usdt_book("ETHUSDT", dec!(100), dec!(101), dec!(10)));
        venue
            .books
            .upsert(tmn_book("ETHTMN", dec!(94), dec!(93), dec!(10000)));

        let output = detector(reference, rate).detect(&venue);
        assert!(output.all_rows.is_empty());
    }

    #[test]
    fn target_above_reference_is_not_a_candidate() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let venue = fake_venue("wallex");

        reference.upsert(usdt_book("BTCUSDT", dec!(100), dec!(101), dec!(10)));
        venue
            .books
            .upsert(tmn_book("BTCTMN", dec!(99), dec!(100), dec!(10000)));

        let output = detector(reference, rate).detect(&venue);
        assert!(output.all_rows.is_empty());
    }

    #[test]
    fn illiquid_rows_fall_below_the_notional_floor() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let venue = fake_venue("wallex");

        reference.upsert(usdt_book("BTCUSDT", dec!(100), dec!(101), dec!(10)));
        // notional = 94 * 100 = 9,400 TMN, far below 500,000
        venue
            .books
            .upsert(tmn_book("BTCTMN", dec!(93), dec!(94), dec!(100)));

        let output = detector(reference, rate).detect(&venue);
        assert!(output.all_rows.is_empty());
    }

    #[test]
    fn rows_below_threshold_are_tracked_but_not_executed() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let venue = fake_venue("wallex");

        reference.upsert(usdt_book("BTCUSDT", dec!(100), dec!(101), dec!(10)));
        // (100 - 99) / 99 * 100 = 1.01%, below the 2.2 threshold
        venue
            .books
            .upsert(tmn_book("BTCTMN", dec!(98), dec!(99), dec!(100000)));

        let output = detector(reference, rate).detect(&venue);
        assert_eq!(output.all_rows.len(), 1);
        assert!(output.candidates.is_empty());
    }

    #[test]
    fn snapshot_is_capped_and_sorted_descending() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(1)));
        let mut venue = fake_venue("wallex");

        // widen the mapping so more than snapshot_len symbols can emit
        use crate::venue::{SymbolMapping, SymbolPair};
        use std::collections::BTreeMap;
        let mut entries = BTreeMap::new();
        for i in 0..12 {
            let base = format!("C{:02}", i);
            entries.insert(
                format!("{}USDT", base),
                SymbolPair {
                    base_asset: base.clone(),
                    tmn_symbol: Some(format!("{}TMN", base)),
                    usdt_symbol: None,
                    amount_precision: 4,
                    price_precision: 0,
                },
            );
        }
        venue.mapping = SymbolMapping::new(entries);

        for i in 0..12u32 {
            let base = format!("C{:02}", i);
            reference.upsert(usdt_book(
                &format!("{}USDT", base),
                dec!(100),
                dec!(101),
                dec!(10),
            ));
            // asks from 98 down to 87 give strictly increasing percents
            let ask = Decimal::from(98 - i as i64);
            venue.books.upsert(tmn_book(
                &format!("{}TMN", base),
                ask - dec!(1),
                ask,
                dec!(100000),
            ));
        }

        let output = detector(reference, rate).detect(&venue);
        assert_eq!(output.all_rows.len(), 12);
        assert_eq!(output.snapshot.len(), 10);
        for pair in output.snapshot.windows(2) {
            assert!(pair[0].percent_diff >= pair[1].percent_diff);
        }
        // best row first: lowest ask has the widest gap
        assert_eq!(output.snapshot[0].buy_price, dec!(87));
    }

    #[test]
    fn usdt_comparison_converts_notional_through_the_rate() {
        let reference = Arc::new(BookStore::new("binance"));
        let rate = Arc::new(RateNormalizer::new(dec!(60000)));
        let venue = fake_venue("wallex");

        reference.upsert(usdt_book("BTCUSDT", dec!(100), dec!(101), dec!(10)));
        // USDT-quoted target: ask 95 x qty 1 = 95 USDT = 5,700,000 TMN notional
        venue
            .books
            .upsert(usdt_book("BTCUSDT", dec!(94), dec!(95), dec!(1)));

        let output = detector(reference, rate).detect(&venue);
        let row = output
            .all_rows
            .iter()
            .find(|r| r.comparison_kind == ComparisonKind::UsdtToUsdt)
            .unwrap();
        assert_eq!(row.notional_value, dec!(5700000));
        assert_eq!(row.percent_diff, dec!(5.26));
    }
}
