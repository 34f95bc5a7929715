// src/testing.rs
// Shared fakes for unit tests.
use crate::domain::errors::{ExecutionError, ExecutionResult};
use crate::domain::models::{
    NormalizedOrderBook, OrderBookSide, OrderRequest, OrderState, QuoteCurrency,
};
use crate::feed::book_store::BookStore;
use crate::feed::FeedHealth;
use crate::venue::{OrderGateway, TargetVenue, VenueMappings};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Gateway that rejects every call; for tests that never reach execution.
pub struct NullGateway;

#[async_trait]
impl OrderGateway for NullGateway {
    fn venue(&self) -> &str {
        "null"
    }

    async fn place_order(&self, _order: &OrderRequest) -> ExecutionResult<String> {
        Err(ExecutionError::Order("null gateway".to_string()))
    }

    async fn get_order(&self, _order_id: &str) -> ExecutionResult<OrderState> {
        Err(ExecutionError::Order("null gateway".to_string()))
    }

    async fn cancel_order(&self, _order_id: &str) -> ExecutionResult<()> {
        Err(ExecutionError::Order("null gateway".to_string()))
    }

    async fn get_balance(&self, _asset: &str) -> ExecutionResult<Decimal> {
        Err(ExecutionError::Balance("null gateway".to_string()))
    }
}

/// Target venue over fresh in-memory state and the default symbol mapping.
pub fn fake_venue(name: &str) -> TargetVenue {
    TargetVenue {
        name: name.to_string(),
        mapping: VenueMappings::default().wallex,
        books: Arc::new(BookStore::new(name)),
        gateway: Arc::new(NullGateway),
        health: Arc::new(FeedHealth::new()),
    }
}

pub fn usdt_book(
    symbol: &str,
    bid: Decimal,
    ask: Decimal,
    qty: Decimal,
) -> NormalizedOrderBook {
    NormalizedOrderBook {
        venue: "binance".to_string(),
        symbol: symbol.to_string(),
        bid: OrderBookSide::new(bid, qty),
        ask: OrderBookSide::new(ask, qty),
        quote_currency: QuoteCurrency::Usdt,
        updated_at: Utc::now(),
    }
}
