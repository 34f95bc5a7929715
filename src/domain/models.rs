// src/domain/models.rs
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quote currency of a venue order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteCurrency {
    Usdt,
    Tmn,
}

impl QuoteCurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteCurrency::Usdt => "USDT",
            QuoteCurrency::Tmn => "TMN",
        }
    }

    /// Infer the quote currency from a venue symbol suffix.
    pub fn from_symbol(symbol: &str) -> QuoteCurrency {
        if symbol.ends_with("TMN") {
            QuoteCurrency::Tmn
        } else {
            QuoteCurrency::Usdt
        }
    }
}

/// One side of the top of book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSide {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl OrderBookSide {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Best bid/ask for one symbol on one venue. Entries are replaced wholesale
/// on every feed update so readers never observe a torn price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrderBook {
    pub venue: String,
    pub symbol: String,
    pub bid: OrderBookSide,
    pub ask: OrderBookSide,
    pub quote_currency: QuoteCurrency,
    pub updated_at: DateTime<Utc>,
}

impl NormalizedOrderBook {
    /// A crossed book (bid at or above ask) must be discarded, not compared.
    pub fn is_valid(&self) -> bool {
        self.bid.price < self.ask.price
            && self.bid.price > Decimal::ZERO
            && self.ask.quantity > Decimal::ZERO
    }
}

/// Which pair of quote forms a comparison was made between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonKind {
    /// Reference USDT book against the target's USDT-quoted book.
    UsdtToUsdt,
    /// Reference USDT book against the target's TMN-quoted book, through
    /// the latest cross rate.
    UsdtToTmn,
}

impl ComparisonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonKind::UsdtToUsdt => "USDT_USDT",
            ComparisonKind::UsdtToTmn => "USDT_TMN",
        }
    }

    pub fn parse(s: &str) -> Option<ComparisonKind> {
        match s {
            "USDT_USDT" => Some(ComparisonKind::UsdtToUsdt),
            "USDT_TMN" => Some(ComparisonKind::UsdtToTmn),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected price gap between the reference venue and a target venue.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageRow {
    /// Reference symbol key, e.g. "BTCUSDT".
    pub symbol: String,
    /// Floor-truncated to two decimal places.
    pub percent_diff: Decimal,
    /// Target venue ask price, in the target book's quote currency.
    pub buy_price: Decimal,
    /// Reference price expressed in the target book's quote currency.
    pub sell_price: Decimal,
    /// Target venue ask quantity.
    pub quantity: Decimal,
    /// Ask quantity x ask price, in TMN.
    pub notional_value: Decimal,
    pub comparison_kind: ComparisonKind,
    pub venue: String,
    pub description: String,
}

/// Retention window for tracked records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodBucket {
    Last1h,
    Last24h,
    LastWeek,
    AllTime,
}

impl PeriodBucket {
    pub const ALL: [PeriodBucket; 4] = [
        PeriodBucket::Last1h,
        PeriodBucket::Last24h,
        PeriodBucket::LastWeek,
        PeriodBucket::AllTime,
    ];

    /// Time-to-live of a record in this bucket. `None` means never evicted.
    pub fn window(&self) -> Option<Duration> {
        match self {
            PeriodBucket::Last1h => Some(Duration::hours(1)),
            PeriodBucket::Last24h => Some(Duration::hours(24)),
            PeriodBucket::LastWeek => Some(Duration::days(7)),
            PeriodBucket::AllTime => None,
        }
    }

    /// Maximum number of records retained in this bucket.
    pub fn capacity(&self) -> usize {
        match self {
            PeriodBucket::AllTime => 50,
            _ => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodBucket::Last1h => "last_1h",
            PeriodBucket::Last24h => "last_24h",
            PeriodBucket::LastWeek => "last_week",
            PeriodBucket::AllTime => "all_time",
        }
    }

    pub fn parse(s: &str) -> Option<PeriodBucket> {
        match s {
            "last_1h" => Some(PeriodBucket::Last1h),
            "last_24h" => Some(PeriodBucket::Last24h),
            "last_week" => Some(PeriodBucket::LastWeek),
            "all_time" => Some(PeriodBucket::AllTime),
            _ => None,
        }
    }
}

impl fmt::Display for PeriodBucket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Best-seen gap for one symbol inside one period bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyDiffRecord {
    pub symbol: String,
    pub comparison_kind: ComparisonKind,
    pub best_percent: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub volume: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl CurrencyDiffRecord {
    pub fn from_row(row: &ArbitrageRow, now: DateTime<Utc>) -> Self {
        Self {
            symbol: row.symbol.clone(),
            comparison_kind: row.comparison_kind,
            best_percent: row.percent_diff,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            volume: row.quantity,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Watching,
    Closed,
}

/// An open BUY/SELL pair created by automated execution, supervised for
/// excess loss until closed.
#[derive(Debug, Clone)]
pub struct Position {
    /// Venue symbol the orders were placed on.
    pub symbol: String,
    pub base_asset: String,
    pub buy_order_id: String,
    pub sell_order_id: Option<String>,
    pub buy_price: Decimal,
    pub quantity: Decimal,
    pub max_loss_percent: Decimal,
    pub state: PositionState,
}

impl Position {
    /// At most one active position exists per key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.symbol, self.buy_order_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderType {
    Market,
    Limit(Decimal),
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit(price) => write!(f, "LIMIT {}", price),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Canceled => write!(f, "CANCELED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Current state of an order at the venue.
#[derive(Debug, Clone)]
pub struct OrderState {
    pub order_id: String,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub executed_price: Option<Decimal>,
}

impl OrderState {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Floor-truncate a value to the given number of decimal places. Never
/// rounds up, so formatted order quantities can't over-commit funds.
pub fn truncate_to_scale(value: Decimal, scale: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(scale));
    (value * factor).trunc() / factor
}

/// Percent gap between a buy price and a sell price, floor-truncated to two
/// decimal places. This is the one percent rule used by the whole pipeline.
pub fn percent_gap(buy_price: Decimal, sell_price: Decimal) -> Decimal {
    let raw = (sell_price - buy_price) / buy_price * Decimal::new(100, 0);
    truncate_to_scale(raw, 2)
}
