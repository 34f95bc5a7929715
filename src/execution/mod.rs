// src/execution/mod.rs
pub mod loss_guard;

use crate::domain::errors::{ExecutionError, ExecutionResult};
use crate::domain::models::{
    ArbitrageRow, ComparisonKind, OrderRequest, OrderSide, OrderState, OrderType, Position,
    PositionState, QuoteCurrency, truncate_to_scale,
};
use crate::execution::loss_guard::LossProtectionMonitor;
use crate::feed::rate::RateNormalizer;
use crate::venue::TargetVenue;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// Fallback order-formatting precision when a symbol is missing from the
/// precision table. Conservative: fewer decimals can only round down.
pub const DEFAULT_AMOUNT_PRECISION: u32 = 2;
pub const DEFAULT_PRICE_PRECISION: u32 = 0;

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Realized loss percent at which the monitor force-closes a position.
    pub max_loss_percent: Decimal,
    /// The SELL leg must clear this notional (TMN), else the BUY is
    /// canceled instead of leaving an unhedged position.
    pub min_sell_notional_tmn: Decimal,
    /// How many times to poll for the BUY fill before giving up.
    pub fill_poll_attempts: u32,
    pub fill_poll_interval: Duration,
}

/// Places the BUY/SELL pair for a qualifying opportunity. At most one pair
/// is in flight per venue symbol at any time; a symbol already in flight is
/// skipped, not queued.
pub struct ExecutionCoordinator {
    settings: ExecutionSettings,
    rate: Arc<RateNormalizer>,
    monitor: Arc<LossProtectionMonitor>,
    in_flight: Mutex<HashSet<String>>,
}

impl ExecutionCoordinator {
    pub fn new(
        settings: ExecutionSettings,
        rate: Arc<RateNormalizer>,
        monitor: Arc<LossProtectionMonitor>,
    ) -> Self {
        Self {
            settings,
            rate,
            monitor,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<LossProtectionMonitor> {
        &self.monitor
    }

    /// Execute one opportunity row against its target venue. Returns the
    /// registered position, or `None` when the row was skipped (already in
    /// flight, unmapped symbol, unconfirmed fill, insufficient balance).
    pub async fn execute(
        &self,
        venue: &TargetVenue,
        row: &ArbitrageRow,
    ) -> ExecutionResult<Option<Position>> {
        let Some(pair) = venue.mapping.get(&row.symbol) else {
            log::warn!(
                "{}: no mapping entry for {}, cannot execute",
                venue.name,
                row.symbol
            );
            return Ok(None);
        };

        let venue_symbol = match row.comparison_kind {
            ComparisonKind::UsdtToTmn => pair.tmn_symbol.clone(),
            ComparisonKind::UsdtToUsdt => pair.usdt_symbol.clone(),
        };
        let Some(venue_symbol) = venue_symbol else {
            log::warn!(
                "{}: mapping for {} lacks a {} symbol",
                venue.name,
                row.symbol,
                row.comparison_kind
            );
            return Ok(None);
        };

        let key = format!("{}:{}", venue.name, venue_symbol);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(key.clone()) {
                log::debug!("{}: execution already in flight, skipping", key);
                return Ok(None);
            }
        }

        let result = self
            .run_order_pair(venue, row, &venue_symbol, &pair.base_asset)
            .await;

        self.in_flight.lock().unwrap().remove(&key);
        result
    }

    async fn run_order_pair(
        &self,
        venue: &TargetVenue,
        row: &ArbitrageRow,
        venue_symbol: &str,
        base_asset: &str,
    ) -> ExecutionResult<Option<Position>> {
        let (amount_precision, price_precision) =
            venue.mapping.precision(&row.symbol).unwrap_or_else(|| {
                log::warn!(
                    "{}: no precision entry for {}, falling back to defaults",
                    venue.name,
                    row.symbol
                );
                (DEFAULT_AMOUNT_PRECISION, DEFAULT_PRICE_PRECISION)
            });

        let quantity = truncate_to_scale(row.quantity, amount_precision);
        let buy_price = truncate_to_scale(row.buy_price, price_precision);
        if quantity <= Decimal::ZERO || buy_price <= Decimal::ZERO {
            log::warn!(
                "{}: {} order would truncate to nothing (qty {}, price {})",
                venue.name,
                venue_symbol,
                quantity,
                buy_price
            );
            return Ok(None);
        }

        let buy_order_id = venue
            .gateway
            .place_order(&OrderRequest {
                symbol: venue_symbol.to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit(buy_price),
                quantity,
            })
            .await?;

        log::info!(
            "{}: placed BUY {} {} @ {} (order {})",
            venue.name,
            quantity,
            venue_symbol,
            buy_price,
            buy_order_id
        );

        let Some(buy_state) = self.await_fill(venue, &buy_order_id).await? else {
            log::warn!(
                "{}: BUY {} not filled after {} polls, cancelling",
                venue.name,
                buy_order_id,
                self.settings.fill_poll_attempts
            );
            if let Err(e) = venue.gateway.cancel_order(&buy_order_id).await {
                log::error!("{}: cancel of {} failed: {}", venue.name, buy_order_id, e);
            }
            return Ok(None);
        };

        let executed_price = buy_state.executed_price.unwrap_or(buy_price);
        let executed_quantity = buy_state.executed_quantity.min(quantity);

        let balance = venue.gateway.get_balance(base_asset).await?;
        let sellable = truncate_to_scale(balance.min(executed_quantity), amount_precision);

        let current_price = venue
            .books
            .top_of_book(venue_symbol)
            .map(|book| book.bid.price)
            .unwrap_or(buy_price);
        let notional_tmn = match QuoteCurrency::from_symbol(venue_symbol) {
            QuoteCurrency::Tmn => sellable * current_price,
            QuoteCurrency::Usdt => self.rate.usdt_to_tmn(sellable * current_price),
        };

        if sellable <= Decimal::ZERO || notional_tmn < self.settings.min_sell_notional_tmn {
            log::warn!(
                "{}: balance {} {} too small to re-sell ({} TMN), cancelling BUY {}",
                venue.name,
                balance,
                base_asset,
                notional_tmn,
                buy_order_id
            );
            if let Err(e) = venue.gateway.cancel_order(&buy_order_id).await {
                log::error!("{}: cancel of {} failed: {}", venue.name, buy_order_id, e);
            }
            return Err(ExecutionError::InsufficientBalance(format!(
                "{} {} worth {} TMN on {}",
                balance, base_asset, notional_tmn, venue.name
            )));
        }

        let sell_price = truncate_to_scale(row.sell_price, price_precision);
        let sell_order_id = venue
            .gateway
            .place_order(&OrderRequest {
                symbol: venue_symbol.to_string(),
                side: OrderSide::Sell,
                order_type: OrderType::Limit(sell_price),
                quantity: sellable,
            })
            .await?;

        log::info!(
            "{}: placed SELL {} {} @ {} (order {})",
            venue.name,
            sellable,
            venue_symbol,
            sell_price,
            sell_order_id
        );

        let position = Position {
            symbol: venue_symbol.to_string(),
            base_asset: base_asset.to_string(),
            buy_order_id,
            sell_order_id: Some(sell_order_id),
            buy_price: executed_price,
            quantity: sellable,
            max_loss_percent: self.settings.max_loss_percent,
            state: PositionState::Watching,
        };

        self.monitor
            .start_monitoring(position.clone(), venue.gateway.clone(), venue.books.clone());

        Ok(Some(position))
    }

    /// Poll the BUY order until it is filled, a bounded number of times.
    async fn await_fill(
        &self,
        venue: &TargetVenue,
        order_id: &str,
    ) -> ExecutionResult<Option<OrderState>> {
        for attempt in 0..self.settings.fill_poll_attempts {
            let state = venue.gateway.get_order(order_id).await?;
            if state.is_filled() {
                return Ok(Some(state));
            }
            log::debug!(
                "{}: order {} still {} (poll {}/{})",
                venue.name,
                order_id,
                state.status,
                attempt + 1,
                self.settings.fill_poll_attempts
            );
            tokio::time::sleep(self.settings.fill_poll_interval).await;
        }
        Ok(None)
    }
}
