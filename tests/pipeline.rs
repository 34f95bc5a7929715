// tests/pipeline.rs
// End-to-end scenario: one detection cycle from books to execution.

use arb_watch::detector::{DetectorSettings, OpportunityDetector};
use arb_watch::domain::errors::ExecutionResult;
use arb_watch::domain::models::{
    ComparisonKind, NormalizedOrderBook, OrderBookSide, OrderRequest, OrderSide, OrderState,
    OrderStatus, PeriodBucket, QuoteCurrency,
};
use arb_watch::execution::loss_guard::LossProtectionMonitor;
use arb_watch::execution::{ExecutionCoordinator, ExecutionSettings};
use arb_watch::feed::book_store::BookStore;
use arb_watch::feed::rate::RateNormalizer;
use arb_watch::feed::FeedHealth;
use arb_watch::tracker::DiffTracker;
use arb_watch::venue::{OrderGateway, SymbolMapping, SymbolPair, TargetVenue};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// Gateway that fills every BUY immediately and records all traffic.
struct RecordingGateway {
    orders: Mutex<Vec<OrderRequest>>,
}

#[async_trait]
impl OrderGateway for RecordingGateway {
    fn venue(&self) -> &str {
        "wallex"
    }

    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<String> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        Ok(format!("ord-{}", orders.len()))
    }

    async fn get_order(&self, order_id: &str) -> ExecutionResult<OrderState> {
        let quantity = self
            .orders
            .lock()
            .unwrap()
            .first()
            .map(|o| o.quantity)
            .unwrap_or(Decimal::ZERO);
        Ok(OrderState {
            order_id: order_id.to_string(),
            status: OrderStatus::Filled,
            executed_quantity: quantity,
            executed_price: None,
        })
    }

    async fn cancel_order(&self, _order_id: &str) -> ExecutionResult<()> {
        Ok(())
    }

    async fn get_balance(&self, _asset: &str) -> ExecutionResult<Decimal> {
        Ok(dec!(10000))
    }
}

fn btc_only_mapping() -> SymbolMapping {
    let mut entries = BTreeMap::new();
    entries.insert(
        "BTCUSDT".to_string(),
        SymbolPair {
            base_asset: "BTC".to_string(),
            tmn_symbol: Some("BTCTMN".to_string()),
            usdt_symbol: None,
            amount_precision: 6,
            price_precision: 0,
        },
    );
    SymbolMapping::new(entries)
}

fn book(
    venue: &str,
    symbol: &str,
    bid: Decimal,
    ask: Decimal,
    qty: Decimal,
    quote: QuoteCurrency,
) -> NormalizedOrderBook {
    NormalizedOrderBook {
        venue: venue.to_string(),
        symbol: symbol.to_string(),
        bid: OrderBookSide::new(bid, qty),
        ask: OrderBookSide::new(ask, qty),
        quote_currency: quote,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn one_cycle_detects_tracks_and_executes_exactly_once() {
    // reference {bid:100, ask:101}, target {bid:93, ask:94}
    let reference = Arc::new(BookStore::new("binance"));
    reference.upsert(book(
        "binance",
        "BTCUSDT",
        dec!(100),
        dec!(101),
        dec!(10),
        QuoteCurrency::Usdt,
    ));

    // rate of 1 keeps the TMN book directly comparable
    let rate = Arc::new(RateNormalizer::new(dec!(1)));

    let gateway = Arc::new(RecordingGateway {
        orders: Mutex::new(Vec::new()),
    });
    let venue = TargetVenue {
        name: "wallex".to_string(),
        mapping: btc_only_mapping(),
        books: Arc::new(BookStore::new("wallex")),
        gateway: gateway.clone(),
        health: Arc::new(FeedHealth::new()),
    };
    // quantity 10,000 keeps the notional (94 x 10,000) above 500,000
    venue.books.upsert(book(
        "wallex",
        "BTCTMN",
        dec!(93),
        dec!(94),
        dec!(10000),
        QuoteCurrency::Tmn,
    ));

    let detector = OpportunityDetector::new(
        reference,
        rate.clone(),
        DetectorSettings {
            min_execution_percent: dec!(2.2),
            min_notional_tmn: dec!(500000),
            snapshot_len: 10,
        },
    );

    // --- detect ---
    let output = detector.detect(&venue);

    assert_eq!(output.all_rows.len(), 1);
    let row = &output.all_rows[0];
    // (100 - 94) / 94 * 100, floor-truncated to two decimals
    assert_eq!(row.percent_diff, dec!(6.38));
    assert_eq!(row.comparison_kind, ComparisonKind::UsdtToTmn);
    assert_eq!(output.candidates.len(), 1);
    assert_eq!(output.snapshot.len(), 1);

    // --- track ---
    let mut tracker = DiffTracker::new("wallex");
    tracker.apply_rows(&output.all_rows, Utc::now());
    for bucket in PeriodBucket::ALL {
        let rankings = tracker.rankings(bucket);
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].best_percent, dec!(6.38));
    }

    // --- execute ---
    let monitor = Arc::new(LossProtectionMonitor::new(Duration::from_secs(60)));
    let coordinator = ExecutionCoordinator::new(
        ExecutionSettings {
            max_loss_percent: dec!(1),
            min_sell_notional_tmn: dec!(100000),
            fill_poll_attempts: 3,
            fill_poll_interval: Duration::from_millis(1),
        },
        rate,
        monitor.clone(),
    );

    let mut executed = 0;
    for row in &output.candidates {
        if coordinator.execute(&venue, row).await.unwrap().is_some() {
            executed += 1;
        }
    }
    assert_eq!(executed, 1);

    // exactly one BUY/SELL pair went to the venue for this symbol
    let orders = gateway.orders.lock().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].symbol, "BTCTMN");
    assert_eq!(orders[1].side, OrderSide::Sell);
    drop(orders);

    // the resulting position is under loss protection
    assert_eq!(monitor.active_count(), 1);
    monitor.stop_all();
    assert_eq!(monitor.active_count(), 0);
}

#[tokio::test]
async fn gap_below_threshold_is_tracked_but_never_executed() {
    let reference = Arc::new(BookStore::new("binance"));
    reference.upsert(book(
        "binance",
        "BTCUSDT",
        dec!(100),
        dec!(101),
        dec!(10),
        QuoteCurrency::Usdt,
    ));

    let rate = Arc::new(RateNormalizer::new(dec!(1)));
    let gateway = Arc::new(RecordingGateway {
        orders: Mutex::new(Vec::new()),
    });
    let venue = TargetVenue {
        name: "wallex".to_string(),
        mapping: btc_only_mapping(),
        books: Arc::new(BookStore::new("wallex")),
        gateway: gateway.clone(),
        health: Arc::new(FeedHealth::new()),
    };
    // (100 - 98) / 98 * 100 = 2.04%, under the 2.2% execution threshold
    venue.books.upsert(book(
        "wallex",
        "BTCTMN",
        dec!(97),
        dec!(98),
        dec!(10000),
        QuoteCurrency::Tmn,
    ));

    let detector = OpportunityDetector::new(
        reference,
        rate,
        DetectorSettings {
            min_execution_percent: dec!(2.2),
            min_notional_tmn: dec!(500000),
            snapshot_len: 10,
        },
    );

    let output = detector.detect(&venue);
    assert_eq!(output.all_rows.len(), 1);
    assert_eq!(output.all_rows[0].percent_diff, dec!(2.04));
    assert!(output.candidates.is_empty());

    let mut tracker = DiffTracker::new("wallex");
    tracker.apply_rows(&output.all_rows, Utc::now());
    assert_eq!(tracker.rankings(PeriodBucket::Last1h).len(), 1);
    assert!(gateway.orders.lock().unwrap().is_empty());
}
