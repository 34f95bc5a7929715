// src/venue/nobitex.rs
use crate::domain::errors::{ExecutionError, ExecutionResult, FeedError, FeedResult};
use crate::domain::models::{
    NormalizedOrderBook, OrderBookSide, OrderRequest, OrderState, OrderStatus, OrderType,
    QuoteCurrency,
};
use crate::feed::poll::PollVenue;
use crate::venue::OrderGateway;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;

/// Poll-mode target venue feed. One REST round fetches every order book;
/// the poll loop replaces the venue's book map wholesale from the result.
pub struct NobitexFeed {
    api_base: String,
    symbols: Vec<String>,
    http: reqwest::Client,
}

impl NobitexFeed {
    pub fn new(api_base: &str, symbols: Vec<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            symbols,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PollVenue for NobitexFeed {
    fn venue(&self) -> &str {
        "nobitex"
    }

    async fn fetch_books(&self) -> FeedResult<Vec<NormalizedOrderBook>> {
        let url = format!("{}/v3/orderbook/all", self.api_base);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Http(format!("orderbook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FeedError::Http(format!(
                "orderbook returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(format!("orderbook body: {}", e)))?;

        let mut books = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let entry = &body[symbol];
            if entry.is_null() {
                continue;
            }
            match parse_book(symbol, entry) {
                Ok(book) => books.push(book),
                Err(e) => {
                    // one symbol's malformed entry never aborts the cycle
                    log::warn!("nobitex: skipping {}: {}", symbol, e);
                }
            }
        }

        Ok(books)
    }
}

/// Books come as `{"bids": [["price","amount"], ...], "asks": [...]}` with
/// levels sorted best-first; only the top level is kept.
fn parse_book(symbol: &str, entry: &Value) -> FeedResult<NormalizedOrderBook> {
    let bid = parse_level(&entry["bids"], "bids")?;
    let ask = parse_level(&entry["asks"], "asks")?;

    Ok(NormalizedOrderBook {
        venue: "nobitex".to_string(),
        symbol: symbol.to_string(),
        bid,
        ask,
        quote_currency: QuoteCurrency::from_symbol(symbol),
        updated_at: Utc::now(),
    })
}

fn parse_level(side: &Value, name: &str) -> FeedResult<OrderBookSide> {
    let levels = side
        .as_array()
        .ok_or_else(|| FeedError::MissingField(name.to_string()))?;
    let best = levels
        .first()
        .and_then(|l| l.as_array())
        .ok_or_else(|| FeedError::Parse(format!("empty {} side", name)))?;

    if best.len() < 2 {
        return Err(FeedError::Parse(format!("short {} level", name)));
    }

    let price = parse_decimal(&best[0])?;
    let quantity = parse_decimal(&best[1])?;
    Ok(OrderBookSide::new(price, quantity))
}

fn parse_decimal(v: &Value) -> FeedResult<Decimal> {
    let raw = v
        .as_str()
        .ok_or_else(|| FeedError::Parse(format!("expected string price, got {}", v)))?;
    Decimal::from_str(raw).map_err(|e| FeedError::Parse(format!("decimal '{}': {}", raw, e)))
}

/// REST order gateway for nobitex.
pub struct NobitexGateway {
    api_base: String,
    token: String,
    http: reqwest::Client,
}

impl NobitexGateway {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> ExecutionResult<Value> {
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::Api(format!("nobitex request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::Api(format!("nobitex response body: {}", e)))?;

        if !status.is_success() || payload["status"].as_str() == Some("failed") {
            return Err(ExecutionError::Api(format!(
                "nobitex returned {}: {}",
                status, payload
            )));
        }

        Ok(payload)
    }
}

fn parse_order(order: &Value) -> ExecutionResult<OrderState> {
    let order_id = order["id"]
        .as_i64()
        .map(|id| id.to_string())
        .or_else(|| order["id"].as_str().map(|s| s.to_string()))
        .ok_or_else(|| ExecutionError::Api("order id missing in response".to_string()))?;

    let matched = order["matchedAmount"]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO);

    let status = match order["status"].as_str() {
        Some("Done") => OrderStatus::Filled,
        Some("Canceled") => OrderStatus::Canceled,
        Some("Active") if matched > Decimal::ZERO => OrderStatus::PartiallyFilled,
        Some("Active") | Some("Inactive") => OrderStatus::New,
        _ => OrderStatus::New,
    };

    let executed_price = order["averagePrice"]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|p| *p > Decimal::ZERO);

    Ok(OrderState {
        order_id,
        status,
        executed_quantity: matched,
        executed_price,
    })
}

#[async_trait]
impl OrderGateway for NobitexGateway {
    fn venue(&self) -> &str {
        "nobitex"
    }

    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<String> {
        let (execution, price) = match &order.order_type {
            OrderType::Market => ("market", None),
            OrderType::Limit(price) => ("limit", Some(price.to_string())),
        };

        let mut body = json!({
            "symbol": order.symbol,
            "type": order.side.as_str().to_lowercase(),
            "execution": execution,
            "amount": order.quantity.to_string(),
        });
        if let Some(price) = price {
            body["price"] = Value::String(price);
        }

        let payload = self
            .post("/market/orders/add", body)
            .await
            .map_err(|e| ExecutionError::Order(format!("place failed: {}", e)))?;

        let state = parse_order(&payload["order"])?;
        Ok(state.order_id)
    }

    async fn get_order(&self, order_id: &str) -> ExecutionResult<OrderState> {
        let payload = self
            .post("/market/orders/status", json!({ "id": order_id }))
            .await?;

        parse_order(&payload["order"])
    }

    async fn cancel_order(&self, order_id: &str) -> ExecutionResult<()> {
        self.post(
            "/market/orders/update-status",
            json!({ "order": order_id, "status": "canceled" }),
        )
        .await
        .map_err(|e| ExecutionError::Order(format!("cancel {} failed: {}", order_id, e)))?;

        Ok(())
    }

    async fn get_balance(&self, asset: &str) -> ExecutionResult<Decimal> {
        let payload = self
            .post(
                "/users/wallets/balance",
                json!({ "currency": asset.to_lowercase() }),
            )
            .await
            .map_err(|e| ExecutionError::Balance(format!("balance fetch failed: {}", e)))?;

        payload["balance"]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| ExecutionError::Balance(format!("no balance for {}", asset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn book_parses_best_level_only() {
        let entry: Value = serde_json::from_str(
            r#"{"bids":[["4100000000","0.5"],["4090000000","2.0"]],"asks":[["4150000000","0.2"]]}"#,
        )
        .unwrap();

        let book = parse_book("BTCTMN", &entry).unwrap();
        assert_eq!(book.bid.price, dec!(4100000000));
        assert_eq!(book.bid.quantity, dec!(0.5));
        assert_eq!(book.ask.price, dec!(4150000000));
        assert_eq!(book.quote_currency, QuoteCurrency::Tmn);
    }

    #[test]
    fn empty_side_is_a_parse_error() {
        let entry: Value =
            serde_json::from_str(r#"{"bids":[],"asks":[["4150000000","0.2"]]}"#).unwrap();
        assert!(parse_book("BTCTMN", &entry).is_err());
    }

    #[test]
    fn order_status_mapping() {
        let done: Value = serde_json::from_str(
            r#"{"id":1234,"status":"Done","matchedAmount":"0.5","averagePrice":"4100000000"}"#,
        )
        .unwrap();
        let state = parse_order(&done).unwrap();
        assert_eq!(state.order_id, "1234");
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(state.executed_price, Some(dec!(4100000000)));

        let partial: Value = serde_json::from_str(
            r#"{"id":1235,"status":"Active","matchedAmount":"0.1"}"#,
        )
        .unwrap();
        assert_eq!(parse_order(&partial).unwrap().status, OrderStatus::PartiallyFilled);

        let resting: Value =
            serde_json::from_str(r#"{"id":1236,"status":"Active","matchedAmount":"0"}"#).unwrap();
        assert_eq!(parse_order(&resting).unwrap().status, OrderStatus::New);
    }
}
