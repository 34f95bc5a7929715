// src/tracker/mod.rs
use crate::domain::models::{ArbitrageRow, CurrencyDiffRecord, PeriodBucket};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Best-seen ranked cache for one venue: four period buckets of records
/// keyed by symbol. Entries are kept for being highest, not most recent,
/// subject to a hard time-to-live per window. Distinct from an LRU.
pub struct DiffTracker {
    venue: String,
    buckets: HashMap<PeriodBucket, HashMap<String, CurrencyDiffRecord>>,
}

impl DiffTracker {
    pub fn new(venue: &str) -> Self {
        let mut buckets = HashMap::new();
        for bucket in PeriodBucket::ALL {
            buckets.insert(bucket, HashMap::new());
        }
        Self {
            venue: venue.to_string(),
            buckets,
        }
    }

    /// Rebuild a tracker from persisted records (startup path).
    pub fn from_records(venue: &str, records: Vec<(PeriodBucket, CurrencyDiffRecord)>) -> Self {
        let mut tracker = Self::new(venue);
        for (bucket, record) in records {
            tracker
                .buckets
                .get_mut(&bucket)
                .expect("all buckets preallocated")
                .insert(record.symbol.clone(), record);
        }
        tracker
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Fold one cycle's rows in: replace-if-better per bucket, then sweep
    /// expired records, then re-sort and truncate to capacity. Callers hold
    /// this tracker behind a lock for the whole cycle so two cycles can
    /// never interleave here.
    pub fn apply_rows(&mut self, rows: &[ArbitrageRow], now: DateTime<Utc>) {
        for row in rows {
            for bucket in PeriodBucket::ALL {
                let records = self
                    .buckets
                    .get_mut(&bucket)
                    .expect("all buckets preallocated");

                let replaces = records
                    .get(&row.symbol)
                    .map_or(true, |existing| row.percent_diff > existing.best_percent);
                if replaces {
                    records.insert(row.symbol.clone(), CurrencyDiffRecord::from_row(row, now));
                }
            }
        }

        self.sweep(now);
        self.enforce_capacity();
    }

    /// Drop records whose last update fell outside the bucket window.
    /// AllTime has no window and is never swept.
    fn sweep(&mut self, now: DateTime<Utc>) {
        for bucket in PeriodBucket::ALL {
            let Some(window) = bucket.window() else {
                continue;
            };
            let records = self
                .buckets
                .get_mut(&bucket)
                .expect("all buckets preallocated");
            records.retain(|_, record| now - record.last_updated <= window);
        }
    }

    /// Keep only the top-K records per bucket, by percent.
    fn enforce_capacity(&mut self) {
        for bucket in PeriodBucket::ALL {
            let records = self
                .buckets
                .get_mut(&bucket)
                .expect("all buckets preallocated");
            let capacity = bucket.capacity();
            if records.len() <= capacity {
                continue;
            }

            let mut sorted: Vec<CurrencyDiffRecord> = records.values().cloned().collect();
            sorted.sort_by(|a, b| b.best_percent.cmp(&a.best_percent));
            sorted.truncate(capacity);

            *records = sorted
                .into_iter()
                .map(|r| (r.symbol.clone(), r))
                .collect();
        }
    }

    /// Records of one bucket, sorted descending by percent.
    pub fn rankings(&self, bucket: PeriodBucket) -> Vec<CurrencyDiffRecord> {
        let mut records: Vec<CurrencyDiffRecord> = self
            .buckets
            .get(&bucket)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.best_percent.cmp(&a.best_percent));
        records
    }

    pub fn all_rankings(&self) -> HashMap<PeriodBucket, Vec<CurrencyDiffRecord>> {
        PeriodBucket::ALL
            .into_iter()
            .map(|bucket| (bucket, self.rankings(bucket)))
            .collect()
    }

    /// Flat record list for the persistence gateway.
    pub fn records(&self) -> Vec<(PeriodBucket, CurrencyDiffRecord)> {
        PeriodBucket::ALL
            .into_iter()
            .flat_map(|bucket| {
                self.rankings(bucket)
                    .into_iter()
                    .map(move |record| (bucket, record))
            })
            .collect()
    }
}
