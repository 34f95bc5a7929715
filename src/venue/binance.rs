// src/venue/binance.rs
use crate::domain::errors::{FeedError, FeedResult};
use crate::domain::models::{NormalizedOrderBook, OrderBookSide, QuoteCurrency};
use crate::feed::book_store::BookStore;
use crate::feed::stream::{StreamVenue, STREAM_BATCH_SIZE};
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Reference venue feed. Book tickers arrive over combined streams, one
/// connection per symbol batch; the stream URL carries the subscription so
/// no subscribe frames are needed.
pub struct BinanceFeed {
    ws_base: String,
    api_base: String,
    http: reqwest::Client,
}

impl BinanceFeed {
    pub fn new(ws_base: &str, api_base: &str) -> Self {
        Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// One-shot REST snapshot used at startup so the detector has reference
    /// prices before the streams catch up. Chunks are fetched concurrently
    /// and independently; a failed chunk is logged and skipped.
    pub async fn initial_books(&self, symbols: &[String]) -> Vec<NormalizedOrderBook> {
        let fetches = symbols
            .chunks(STREAM_BATCH_SIZE)
            .map(|chunk| self.fetch_chunk(chunk));

        let mut books = Vec::new();
        for result in join_all(fetches).await {
            match result {
                Ok(mut chunk_books) => books.append(&mut chunk_books),
                Err(e) => log::warn!("binance: initial snapshot chunk failed: {}", e),
            }
        }
        books
    }

    async fn fetch_chunk(&self, symbols: &[String]) -> FeedResult<Vec<NormalizedOrderBook>> {
        let list = symbols
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/api/v3/ticker/bookTicker?symbols=[{}]",
            self.api_base, list
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Http(format!("bookTicker request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FeedError::Http(format!(
                "bookTicker returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(format!("bookTicker body: {}", e)))?;

        let entries = body
            .as_array()
            .ok_or_else(|| FeedError::Parse("bookTicker body is not an array".to_string()))?;

        let mut books = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_book_ticker(entry) {
                Ok(book) => books.push(book),
                Err(e) => {
                    // a single malformed entry never aborts the batch
                    log::warn!("binance: skipping malformed ticker entry: {}", e);
                }
            }
        }
        Ok(books)
    }
}

impl StreamVenue for BinanceFeed {
    fn venue(&self) -> &str {
        "binance"
    }

    fn connect_url(&self, batch: &[String]) -> FeedResult<Url> {
        let streams = batch
            .iter()
            .map(|s| format!("{}@bookTicker", s.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        let raw = format!("{}/stream?streams={}", self.ws_base, streams);

        Url::parse(&raw).map_err(|e| FeedError::Connection(format!("Invalid stream URL: {}", e)))
    }

    fn subscribe_frames(&self, _batch: &[String]) -> Vec<Message> {
        Vec::new()
    }

    fn handle_message(&self, text: &str, store: &BookStore) -> FeedResult<()> {
        let v: Value = serde_json::from_str(text)
            .map_err(|e| FeedError::Parse(format!("stream frame: {}", e)))?;

        // combined-stream envelope: {"stream": "...", "data": {...}}
        let data = if v.get("data").is_some() { &v["data"] } else { &v };
        let book = parse_book_ticker(data)?;
        if !book.is_valid() {
            log::debug!("binance: discarding crossed book for {}", book.symbol);
            return Ok(());
        }
        store.upsert(book);
        Ok(())
    }
}

/// Shared shape between the REST snapshot and the stream payload:
/// symbol `s`, best bid `b`/`B`, best ask `a`/`A` (REST spells them out).
fn parse_book_ticker(v: &Value) -> FeedResult<NormalizedOrderBook> {
    let field = |short: &str, long: &str| -> FeedResult<&str> {
        v[short]
            .as_str()
            .or_else(|| v[long].as_str())
            .ok_or_else(|| FeedError::MissingField(format!("{}/{}", short, long)))
    };

    let symbol = field("s", "symbol")?;
    let bid_price = parse_decimal(field("b", "bidPrice")?)?;
    let bid_qty = parse_decimal(field("B", "bidQty")?)?;
    let ask_price = parse_decimal(field("a", "askPrice")?)?;
    let ask_qty = parse_decimal(field("A", "askQty")?)?;

    Ok(NormalizedOrderBook {
        venue: "binance".to_string(),
        symbol: symbol.to_string(),
        bid: OrderBookSide::new(bid_price, bid_qty),
        ask: OrderBookSide::new(ask_price, ask_qty),
        quote_currency: QuoteCurrency::Usdt,
        updated_at: Utc::now(),
    })
}

fn parse_decimal(s: &str) -> FeedResult<Decimal> {
    Decimal::from_str(s).map_err(|e| FeedError::Parse(format!("decimal '{}': {}", s, e)))
}
