// src/execution/loss_guard.rs
use crate::domain::models::{
    OrderRequest, OrderSide, OrderStatus, OrderType, Position, PositionState,
};
use crate::feed::book_store::BookStore;
use crate::venue::OrderGateway;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Supervises open positions and force-closes any whose realized loss
/// exceeds its threshold. One polling task per position; state machine per
/// position is Watching until closed by profit-taking or by the trigger.
pub struct LossProtectionMonitor {
    poll_interval: Duration,
    watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl LossProtectionMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin watching a position. A key already being watched is rejected;
    /// the second call is a no-op and returns false.
    pub fn start_monitoring(
        &self,
        position: Position,
        gateway: Arc<dyn OrderGateway>,
        books: Arc<BookStore>,
    ) -> bool {
        let key = position.key();
        let mut watchers = self.watchers.lock().unwrap();
        if watchers.contains_key(&key) {
            log::warn!("Already monitoring position {}", key);
            return false;
        }

        log::info!(
            "Watching position {} (max loss {}%)",
            key,
            position.max_loss_percent
        );

        let poll_interval = self.poll_interval;
        let registry = self.watchers.clone();
        let watcher_key = key.clone();
        let handle = tokio::spawn(async move {
            watch_position(position, gateway, books, poll_interval).await;
            registry.lock().unwrap().remove(&watcher_key);
        });

        watchers.insert(key, handle);
        true
    }

    /// Stop watching one position. Idempotent.
    pub fn stop_monitoring(&self, key: &str) {
        if let Some(handle) = self.watchers.lock().unwrap().remove(key) {
            handle.abort();
            log::info!("Stopped monitoring position {}", key);
        }
    }

    /// Stop every watcher. Idempotent.
    pub fn stop_all(&self) {
        let mut watchers = self.watchers.lock().unwrap();
        for (key, handle) in watchers.drain() {
            handle.abort();
            log::info!("Stopped monitoring position {}", key);
        }
    }

    pub fn active_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }
}

/// Poll loop for one position. Every tick: confirm the BUY fill, check the
/// SELL leg, and compute the live loss against the venue's current bid.
/// Order-gateway failures are logged and retried on the next tick; nothing
/// here can take the process down.
async fn watch_position(
    mut position: Position,
    gateway: Arc<dyn OrderGateway>,
    books: Arc<BookStore>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let buy = match gateway.get_order(&position.buy_order_id).await {
            Ok(state) => state,
            Err(e) => {
                log::error!(
                    "Position {}: BUY status fetch failed: {}",
                    position.key(),
                    e
                );
                continue;
            }
        };

        // not fully filled yet, keep waiting
        if !buy.is_filled() {
            continue;
        }

        let executed_price = buy.executed_price.unwrap_or(position.buy_price);
        let executed_quantity = if buy.executed_quantity > Decimal::ZERO {
            buy.executed_quantity
        } else {
            position.quantity
        };

        let Some(sell_order_id) = position.sell_order_id.clone() else {
            continue;
        };

        match gateway.get_order(&sell_order_id).await {
            Ok(sell) if sell.status == OrderStatus::Filled => {
                log::info!(
                    "Position {}: SELL {} filled, closing normally",
                    position.key(),
                    sell_order_id
                );
                position.state = PositionState::Closed;
                return;
            }
            Ok(sell)
                if sell.status == OrderStatus::Canceled
                    || sell.status == OrderStatus::Rejected =>
            {
                log::warn!(
                    "Position {}: SELL {} is {}, stopping watch",
                    position.key(),
                    sell_order_id,
                    sell.status
                );
                position.state = PositionState::Closed;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!(
                    "Position {}: SELL status fetch failed: {}",
                    position.key(),
                    e
                );
                continue;
            }
        }

        let Some(book) = books.top_of_book(&position.symbol) else {
            continue;
        };
        let current_sell_price = book.bid.price;
        if executed_price <= Decimal::ZERO {
            continue;
        }

        let loss_percent =
            (executed_price - current_sell_price) / executed_price * Decimal::new(100, 0);

        if loss_percent <= position.max_loss_percent {
            continue;
        }

        log::warn!(
            "Position {}: loss {}% exceeds {}%, force-closing",
            position.key(),
            loss_percent,
            position.max_loss_percent
        );

        if let Err(e) = gateway.cancel_order(&sell_order_id).await {
            log::error!(
                "Position {}: cancel of SELL {} failed: {}",
                position.key(),
                sell_order_id,
                e
            );
        }

        match gateway
            .place_order(&OrderRequest {
                symbol: position.symbol.clone(),
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                quantity: executed_quantity,
            })
            .await
        {
            Ok(order_id) => {
                log::info!(
                    "Position {}: market SELL {} placed, position closed",
                    position.key(),
                    order_id
                );
                position.state = PositionState::Closed;
                return;
            }
            Err(e) => {
                // retried next tick; the position stays watched until the
                // exit actually goes through
                log::error!(
                    "Position {}: market SELL failed, will retry: {}",
                    position.key(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ExecutionError, ExecutionResult};
    use crate::domain::models::{
        NormalizedOrderBook, OrderBookSide, OrderState, QuoteCurrency,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    struct ScriptedGateway {
        buy_filled: bool,
        sell_status: OrderStatus,
        placed: Mutex<Vec<OrderRequest>>,
        cancels: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(buy_filled: bool, sell_status: OrderStatus) -> Self {
            Self {
                buy_filled,
                sell_status,
                placed: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        fn venue(&self) -> &str {
            "scripted"
        }

        async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<String> {
            self.placed.lock().unwrap().push(order.clone());
            Ok("exit-1".to_string())
        }

        async fn get_order(&self, order_id: &str) -> ExecutionResult<OrderState> {
            if order_id == "buy-1" {
                return Ok(OrderState {
                    order_id: order_id.to_string(),
                    status: if self.buy_filled {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::New
                    },
                    executed_quantity: dec!(0.5),
                    executed_price: Some(dec!(100)),
                });
            }
            Ok(OrderState {
                order_id: order_id.to_string(),
                status: self.sell_status,
                executed_quantity: Decimal::ZERO,
                executed_price: None,
            })
        }

        async fn cancel_order(&self, order_id: &str) -> ExecutionResult<()> {
            self.cancels.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn get_balance(&self, _asset: &str) -> ExecutionResult<Decimal> {
            Err(ExecutionError::Balance("not needed".to_string()))
        }
    }

    fn position() -> Position {
        Position {
            symbol: "BTCTMN".to_string(),
            base_asset: "BTC".to_string(),
            buy_order_id: "buy-1".to_string(),
            sell_order_id: Some("sell-1".to_string()),
            buy_price: dec!(100),
            quantity: dec!(0.5),
            max_loss_percent: dec!(5),
            state: PositionState::Watching,
        }
    }

    fn books_with_bid(bid: Decimal) -> Arc<BookStore> {
        let books = Arc::new(BookStore::new("scripted"));
        books.upsert(NormalizedOrderBook {
            venue: "scripted".to_string(),
            symbol: "BTCTMN".to_string(),
            bid: OrderBookSide::new(bid, dec!(1)),
            ask: OrderBookSide::new(bid + dec!(1), dec!(1)),
            quote_currency: QuoteCurrency::Tmn,
            updated_at: Utc::now(),
        });
        books
    }

    #[tokio::test]
    async fn duplicate_key_is_a_no_op() {
        let monitor = LossProtectionMonitor::new(Duration::from_secs(60));
        let gateway = Arc::new(ScriptedGateway::new(false, OrderStatus::New));
        let books = books_with_bid(dec!(100));

        assert!(monitor.start_monitoring(position(), gateway.clone(), books.clone()));
        assert!(!monitor.start_monitoring(position(), gateway, books));
        assert_eq!(monitor.active_count(), 1);

        monitor.stop_all();
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test]
    async fn excess_loss_cancels_sell_and_exits_at_market() {
        let monitor = LossProtectionMonitor::new(Duration::from_millis(5));
        let gateway = Arc::new(ScriptedGateway::new(true, OrderStatus::New));
        // bought at 100, bid now 90: 10% loss against a 5% threshold
        let books = books_with_bid(dec!(90));

        monitor.start_monitoring(position(), gateway.clone(), books);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(gateway.cancels.lock().unwrap().as_slice(), ["sell-1"]);
        let placed = gateway.placed.lock().unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Sell);
        assert_eq!(placed[0].order_type, OrderType::Market);
        assert_eq!(placed[0].quantity, dec!(0.5));
        drop(placed);

        // the watcher removed itself after closing
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test]
    async fn tolerable_loss_keeps_watching() {
        let monitor = LossProtectionMonitor::new(Duration::from_millis(5));
        let gateway = Arc::new(ScriptedGateway::new(true, OrderStatus::New));
        // bought at 100, bid 97: 3% loss stays under the 5% threshold
        let books = books_with_bid(dec!(97));

        monitor.start_monitoring(position(), gateway.clone(), books);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(gateway.cancels.lock().unwrap().is_empty());
        assert!(gateway.placed.lock().unwrap().is_empty());
        assert_eq!(monitor.active_count(), 1);

        monitor.stop_all();
    }

    #[tokio::test]
    async fn filled_sell_closes_the_position_normally() {
        let monitor = LossProtectionMonitor::new(Duration::from_millis(5));
        let gateway = Arc::new(ScriptedGateway::new(true, OrderStatus::Filled));
        let books = books_with_bid(dec!(90));

        monitor.start_monitoring(position(), gateway.clone(), books);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // closed by profit-taking: no cancel, no market exit
        assert!(gateway.cancels.lock().unwrap().is_empty());
        assert!(gateway.placed.lock().unwrap().is_empty());
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test]
    async fn unfilled_buy_keeps_the_watcher_waiting() {
        let monitor = LossProtectionMonitor::new(Duration::from_millis(5));
        let gateway = Arc::new(ScriptedGateway::new(false, OrderStatus::New));
        let books = books_with_bid(dec!(50));

        monitor.start_monitoring(position(), gateway.clone(), books);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // nothing happens until the BUY is filled, whatever the price does
        assert!(gateway.placed.lock().unwrap().is_empty());
        assert_eq!(monitor.active_count(), 1);

        monitor.stop_monitoring("BTCTMN:buy-1");
        monitor.stop_monitoring("BTCTMN:buy-1");
        assert_eq!(monitor.active_count(), 0);
    }
}
