// src/feed/stream.rs
use crate::domain::errors::{FeedError, FeedResult};
use crate::feed::book_store::BookStore;
use crate::feed::FeedHealth;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// A single connection can only carry so many channels, so symbols are
/// partitioned into batches of this size, one connection per batch.
pub const STREAM_BATCH_SIZE: usize = 15;

/// Base reconnect delay; doubles per consecutive disconnect.
pub const BACKOFF_BASE_MS: u64 = 3_000;

/// A batch that disconnects this many times in a row is left permanently
/// degraded (logged, not fatal to the process).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Delay before the next reconnect attempt after `failures` consecutive
/// disconnects: 3000 x 2^failures ms.
pub fn backoff_delay(failures: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << failures.min(MAX_RECONNECT_ATTEMPTS))
}

/// Venue with a persistent feed. The stream runner owns the connection
/// lifecycle; the venue supplies the wire details.
pub trait StreamVenue: Send + Sync + 'static {
    fn venue(&self) -> &str;

    /// Websocket URL for one symbol batch.
    fn connect_url(&self, batch: &[String]) -> FeedResult<Url>;

    /// Frames to send right after connecting. Empty when the URL itself
    /// carries the subscription.
    fn subscribe_frames(&self, batch: &[String]) -> Vec<Message>;

    /// Apply one inbound text frame to the store. A malformed frame is an
    /// error for this symbol only; the connection stays up.
    fn handle_message(&self, text: &str, store: &BookStore) -> FeedResult<()>;
}

/// Start a stream-mode feed: one background task per batch of
/// `STREAM_BATCH_SIZE` symbols, each owning its own connection and
/// reconnect state.
pub fn spawn_stream_feed(
    venue: Arc<dyn StreamVenue>,
    symbols: Vec<String>,
    store: Arc<BookStore>,
    health: Arc<FeedHealth>,
) -> Vec<JoinHandle<()>> {
    symbols
        .chunks(STREAM_BATCH_SIZE)
        .map(|batch| {
            let venue = venue.clone();
            let store = store.clone();
            let health = health.clone();
            let batch = batch.to_vec();
            tokio::spawn(async move {
                run_batch(venue, batch, store, health).await;
            })
        })
        .collect()
}

/// Connection loop for one batch. On disconnect, retry with exponential
/// backoff; a successful resubscribe resets the attempt counter. After
/// `MAX_RECONNECT_ATTEMPTS` consecutive disconnects the batch gives up.
async fn run_batch(
    venue: Arc<dyn StreamVenue>,
    batch: Vec<String>,
    store: Arc<BookStore>,
    health: Arc<FeedHealth>,
) {
    let mut failures: u32 = 0;

    loop {
        match connect_and_stream(venue.as_ref(), &batch, &store, &health).await {
            Ok(()) => {
                // was subscribed, then lost the connection: new streak
                failures = 1;
            }
            Err(e) => {
                failures += 1;
                log::warn!(
                    "{}: connection attempt failed ({} consecutive): {}",
                    venue.venue(),
                    failures,
                    e
                );
            }
        }

        if failures >= MAX_RECONNECT_ATTEMPTS {
            log::error!(
                "{}: giving up on batch of {} symbols after {} attempts; feed degraded",
                venue.venue(),
                batch.len(),
                failures
            );
            return;
        }

        let delay = backoff_delay(failures);
        log::info!(
            "{}: reconnecting batch of {} symbols in {:?}",
            venue.venue(),
            batch.len(),
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// One connection lifetime. `Ok(())` means the batch was subscribed and the
/// connection later closed; `Err` means the connection or subscription never
/// came up.
async fn connect_and_stream(
    venue: &dyn StreamVenue,
    batch: &[String],
    store: &BookStore,
    health: &FeedHealth,
) -> FeedResult<()> {
    let url = venue.connect_url(batch)?;

    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| FeedError::Connection(format!("WebSocket connection failed: {}", e)))?;

    let (mut write, mut read) = ws_stream.split();

    for frame in venue.subscribe_frames(batch) {
        write
            .send(frame)
            .await
            .map_err(|e| FeedError::Subscription(format!("Subscribe failed: {}", e)))?;
    }

    health.mark_up();
    log::info!(
        "{}: subscribed batch of {} symbols",
        venue.venue(),
        batch.len()
    );

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = venue.handle_message(&text, store) {
                    log::error!("{}: dropped frame: {}", venue.venue(), e);
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                if write.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                log::info!("{}: stream closed by peer", venue.venue());
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("{}: stream error: {}", venue.venue(), e);
                break;
            }
        }
    }

    health.mark_down();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_per_consecutive_disconnect() {
        assert_eq!(backoff_delay(0), Duration::from_millis(3_000));
        assert_eq!(backoff_delay(1), Duration::from_millis(6_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(12_000));
        assert_eq!(backoff_delay(9), Duration::from_millis(1_536_000));
    }

    #[test]
    fn attempt_cap_stops_the_loop() {
        // mirror of run_batch's exit condition: once failures reach the cap
        // no further attempt is scheduled
        let mut attempts_fired = 0;
        let mut failures: u32 = 0;
        loop {
            failures += 1; // every attempt fails
            if failures >= MAX_RECONNECT_ATTEMPTS {
                break;
            }
            attempts_fired += 1;
        }
        assert_eq!(attempts_fired, 9);
        assert_eq!(failures, MAX_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn batches_are_fixed_size() {
        let symbols: Vec<String> = (0..40).map(|i| format!("SYM{}", i)).collect();
        let chunks: Vec<_> = symbols.chunks(STREAM_BATCH_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 15);
        assert_eq!(chunks[2].len(), 10);
    }
}
