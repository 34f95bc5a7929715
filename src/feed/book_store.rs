// src/feed/book_store.rs
use crate::domain::models::NormalizedOrderBook;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory top-of-book cache for one venue. Written by exactly one feed,
/// read by the detector and the loss monitor. Entries are always replaced
/// wholesale, never mutated field by field.
pub struct BookStore {
    venue: String,
    books: RwLock<HashMap<String, NormalizedOrderBook>>,
}

impl BookStore {
    pub fn new(venue: &str) -> Self {
        Self {
            venue: venue.to_string(),
            books: RwLock::new(HashMap::new()),
        }
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Last known top of book for a symbol. Non-blocking; the value may be
    /// stale if the feed has fallen behind.
    pub fn top_of_book(&self, symbol: &str) -> Option<NormalizedOrderBook> {
        self.books.read().unwrap().get(symbol).cloned()
    }

    /// Replace the whole map in one step (poll mode).
    pub fn replace_all(&self, books: Vec<NormalizedOrderBook>) {
        let mut map = HashMap::with_capacity(books.len());
        for book in books {
            map.insert(book.symbol.clone(), book);
        }
        *self.books.write().unwrap() = map;
    }

    /// Replace a single symbol's entry in one step (stream mode).
    pub fn upsert(&self, book: NormalizedOrderBook) {
        self.books
            .write()
            .unwrap()
            .insert(book.symbol.clone(), book);
    }

    pub fn len(&self) -> usize {
        self.books.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OrderBookSide, QuoteCurrency};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn book(symbol: &str, bid: rust_decimal::Decimal) -> NormalizedOrderBook {
        NormalizedOrderBook {
            venue: "wallex".to_string(),
            symbol: symbol.to_string(),
            bid: OrderBookSide::new(bid, dec!(1)),
            ask: OrderBookSide::new(bid + dec!(1), dec!(1)),
            quote_currency: QuoteCurrency::Tmn,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_entry_wholesale() {
        let store = BookStore::new("wallex");
        store.upsert(book("BTCTMN", dec!(100)));
        store.upsert(book("BTCTMN", dec!(200)));

        let current = store.top_of_book("BTCTMN").unwrap();
        assert_eq!(current.bid.price, dec!(200));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_all_drops_absent_symbols() {
        let store = BookStore::new("wallex");
        store.replace_all(vec![book("BTCTMN", dec!(1)), book("ETHTMN", dec!(2))]);
        store.replace_all(vec![book("BTCTMN", dec!(3))]);

        assert_eq!(store.len(), 1);
        assert!(store.top_of_book("ETHTMN").is_none());
    }
}
