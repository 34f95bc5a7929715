// src/feed/poll.rs
use crate::domain::errors::FeedResult;
use crate::domain::models::NormalizedOrderBook;
use crate::feed::book_store::BookStore;
use crate::feed::FeedHealth;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// REST-only venue that can produce its full book set in one fetch round.
/// Implementations skip and log malformed per-symbol entries; a skipped
/// symbol never aborts the round.
#[async_trait]
pub trait PollVenue: Send + Sync + 'static {
    fn venue(&self) -> &str;

    async fn fetch_books(&self) -> FeedResult<Vec<NormalizedOrderBook>>;
}

/// Run a poll-mode feed: every `period`, fetch the venue's books and replace
/// the store wholesale. A failed round is logged and retried on the next
/// scheduled tick, never sooner.
pub fn spawn_poll_feed(
    venue: Arc<dyn PollVenue>,
    store: Arc<BookStore>,
    health: Arc<FeedHealth>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match venue.fetch_books().await {
                Ok(books) => {
                    let (valid, crossed): (Vec<_>, Vec<_>) =
                        books.into_iter().partition(|b| b.is_valid());
                    for book in &crossed {
                        log::debug!(
                            "{}: discarding crossed book for {} (bid {} >= ask {})",
                            venue.venue(),
                            book.symbol,
                            book.bid.price,
                            book.ask.price
                        );
                    }
                    log::debug!("{}: refreshed {} books", venue.venue(), valid.len());
                    store.replace_all(valid);
                    health.set_connected(true);
                }
                Err(e) => {
                    log::warn!(
                        "{}: fetch failed, keeping last books until next cycle: {}",
                        venue.venue(),
                        e
                    );
                    health.set_connected(false);
                }
            }
        }
    })
}
