// src/broadcast.rs
use crate::domain::models::{ArbitrageRow, CurrencyDiffRecord, PeriodBucket};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// What the core pushes downstream once per detection cycle per venue. The
/// transport that fans this out to clients is an external collaborator; the
/// core only writes to the channel.
#[derive(Debug, Clone, Serialize)]
pub struct VenueSnapshot {
    pub venue: String,
    pub generated_at: DateTime<Utc>,
    /// Top rows of the cycle, sorted descending by percent.
    pub latest: Vec<ArbitrageRow>,
    /// Current rankings per period bucket.
    pub rankings: HashMap<PeriodBucket, Vec<CurrencyDiffRecord>>,
}

/// Outbound snapshot channel.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<VenueSnapshot>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VenueSnapshot> {
        self.tx.subscribe()
    }

    pub fn publish(&self, snapshot: VenueSnapshot) {
        if self.tx.send(snapshot).is_err() {
            // no subscribers right now; snapshots are fire-and-forget
            log::debug!("No snapshot subscribers connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(VenueSnapshot {
            venue: "wallex".to_string(),
            generated_at: Utc::now(),
            latest: Vec::new(),
            rankings: HashMap::new(),
        });

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.venue, "wallex");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let sink = BroadcastSink::new(8);
        sink.publish(VenueSnapshot {
            venue: "nobitex".to_string(),
            generated_at: Utc::now(),
            latest: Vec::new(),
            rankings: HashMap::new(),
        });
    }
}
