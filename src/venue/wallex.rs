// src/venue/wallex.rs
use crate::domain::errors::{ExecutionError, ExecutionResult, FeedError, FeedResult};
use crate::domain::models::{
    NormalizedOrderBook, OrderBookSide, OrderRequest, OrderState, OrderStatus, OrderType,
    QuoteCurrency,
};
use crate::feed::book_store::BookStore;
use crate::feed::rate::RateNormalizer;
use crate::feed::stream::StreamVenue;
use crate::venue::OrderGateway;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// The venue pair whose bid feeds the cross rate.
pub const RATE_SYMBOL: &str = "USDTTMN";

/// Stream-mode target venue feed. Depth updates arrive one side at a time
/// on `<SYMBOL>@buyDepth` / `<SYMBOL>@sellDepth` channels; the feed merges
/// each update with the last known opposite side and writes a complete book
/// so readers never see a torn price.
pub struct WallexFeed {
    ws_url: String,
    rate: Arc<RateNormalizer>,
    pending: Mutex<HashMap<String, PendingBook>>,
}

#[derive(Default, Clone)]
struct PendingBook {
    bid: Option<OrderBookSide>,
    ask: Option<OrderBookSide>,
}

impl WallexFeed {
    pub fn new(ws_url: &str, rate: Arc<RateNormalizer>) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            rate,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn apply_side(
        &self,
        symbol: &str,
        is_bid: bool,
        side: OrderBookSide,
        store: &BookStore,
    ) {
        let merged = {
            let mut pending = self.pending.lock().unwrap();
            let entry = pending.entry(symbol.to_string()).or_default();
            if is_bid {
                entry.bid = Some(side);
            } else {
                entry.ask = Some(side);
            }
            entry.clone()
        };

        // hold the symbol until both sides have been seen once
        let (Some(bid), Some(ask)) = (merged.bid, merged.ask) else {
            return;
        };

        let book = NormalizedOrderBook {
            venue: "wallex".to_string(),
            symbol: symbol.to_string(),
            bid,
            ask,
            quote_currency: QuoteCurrency::from_symbol(symbol),
            updated_at: Utc::now(),
        };

        if !book.is_valid() {
            log::debug!("wallex: discarding crossed book for {}", symbol);
            return;
        }

        // the one writer of the cross rate
        if symbol == RATE_SYMBOL {
            self.rate.update(book.bid.price);
        }

        store.upsert(book);
    }
}

impl StreamVenue for WallexFeed {
    fn venue(&self) -> &str {
        "wallex"
    }

    fn connect_url(&self, _batch: &[String]) -> FeedResult<Url> {
        Url::parse(&self.ws_url)
            .map_err(|e| FeedError::Connection(format!("Invalid WebSocket URL: {}", e)))
    }

    fn subscribe_frames(&self, batch: &[String]) -> Vec<Message> {
        batch
            .iter()
            .flat_map(|symbol| {
                ["buyDepth", "sellDepth"].into_iter().map(move |side| {
                    let frame =
                        json!(["subscribe", { "channel": format!("{}@{}", symbol, side) }]);
                    Message::Text(frame.to_string())
                })
            })
            .collect()
    }

    fn handle_message(&self, text: &str, store: &BookStore) -> FeedResult<()> {
        let v: Value = serde_json::from_str(text)
            .map_err(|e| FeedError::Parse(format!("depth frame: {}", e)))?;

        let channel = v["channel"]
            .as_str()
            .ok_or_else(|| FeedError::MissingField("channel".to_string()))?;

        let (symbol, side_name) = channel
            .split_once('@')
            .ok_or_else(|| FeedError::Parse(format!("channel '{}'", channel)))?;

        let is_bid = match side_name {
            "buyDepth" => true,
            "sellDepth" => false,
            other => return Err(FeedError::Parse(format!("unknown channel kind '{}'", other))),
        };

        let levels = v["data"]
            .as_array()
            .ok_or_else(|| FeedError::MissingField("data".to_string()))?;

        // best level only; deeper levels are not modeled
        let best = levels
            .first()
            .ok_or_else(|| FeedError::Parse(format!("empty depth for {}", channel)))?;

        let price = parse_decimal_field(best, "price")?;
        let quantity = parse_decimal_field(best, "quantity")?;

        self.apply_side(symbol, is_bid, OrderBookSide::new(price, quantity), store);
        Ok(())
    }
}

fn parse_decimal_field(v: &Value, field: &str) -> FeedResult<Decimal> {
    let raw = v[field]
        .as_str()
        .ok_or_else(|| FeedError::MissingField(field.to_string()))?;
    Decimal::from_str(raw).map_err(|e| FeedError::Parse(format!("{} '{}': {}", field, raw, e)))
}

/// REST order gateway for wallex.
pub struct WallexGateway {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
}

impl WallexGateway {
    pub fn new(api_base: &str, api_key: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> ExecutionResult<Value> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("X-API-Key", &self.api_key);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::Api(format!("wallex request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::Api(format!("wallex response body: {}", e)))?;

        if !status.is_success() {
            return Err(ExecutionError::Api(format!(
                "wallex returned {}: {}",
                status, payload
            )));
        }

        Ok(payload)
    }
}

fn parse_order_state(result: &Value) -> ExecutionResult<OrderState> {
    let order_id = result["clientOrderId"]
        .as_str()
        .or_else(|| result["orderId"].as_str())
        .ok_or_else(|| ExecutionError::Api("order id missing in response".to_string()))?;

    let status = match result["status"].as_str() {
        Some("FILLED") => OrderStatus::Filled,
        Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
        Some("CANCELED") => OrderStatus::Canceled,
        Some("REJECTED") => OrderStatus::Rejected,
        _ => OrderStatus::New,
    };

    let executed_qty = result["executedQty"]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO);

    let executed_price = result["executedPrice"]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|p| *p > Decimal::ZERO);

    Ok(OrderState {
        order_id: order_id.to_string(),
        status,
        executed_quantity: executed_qty,
        executed_price,
    })
}

#[async_trait]
impl OrderGateway for WallexGateway {
    fn venue(&self) -> &str {
        "wallex"
    }

    async fn place_order(&self, order: &OrderRequest) -> ExecutionResult<String> {
        let (order_type, price) = match &order.order_type {
            OrderType::Market => ("MARKET", None),
            OrderType::Limit(price) => ("LIMIT", Some(price.to_string())),
        };

        let mut body = json!({
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "type": order_type,
            "quantity": order.quantity.to_string(),
        });
        if let Some(price) = price {
            body["price"] = Value::String(price);
        }

        let payload = self
            .request(reqwest::Method::POST, "/v1/account/orders", Some(body))
            .await
            .map_err(|e| ExecutionError::Order(format!("place failed: {}", e)))?;

        let state = parse_order_state(&payload["result"])?;
        Ok(state.order_id)
    }

    async fn get_order(&self, order_id: &str) -> ExecutionResult<OrderState> {
        let payload = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/account/orders/{}", order_id),
                None,
            )
            .await?;

        parse_order_state(&payload["result"])
    }

    async fn cancel_order(&self, order_id: &str) -> ExecutionResult<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("/v1/account/orders/{}", order_id),
            None,
        )
        .await
        .map_err(|e| ExecutionError::Order(format!("cancel {} failed: {}", order_id, e)))?;

        Ok(())
    }

    async fn get_balance(&self, asset: &str) -> ExecutionResult<Decimal> {
        let payload = self
            .request(reqwest::Method::GET, "/v1/account/balances", None)
            .await
            .map_err(|e| ExecutionError::Balance(format!("balance fetch failed: {}", e)))?;

        let entry = &payload["result"]["balances"][asset];
        if entry.is_null() {
            return Err(ExecutionError::Balance(format!("no balance for {}", asset)));
        }

        let value = entry["value"]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        let locked = entry["locked"]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(value - locked)
    }
}
