// src/persistence/mod.rs
pub mod sqlite;

use crate::domain::errors::PersistenceResult;
use crate::domain::models::{CurrencyDiffRecord, PeriodBucket};
use async_trait::async_trait;

/// Durable store for tracker snapshots, keyed by venue. One row per
/// (venue, symbol, period). The storage engine behind it is an external
/// concern; only this contract is part of the core.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(
        &self,
        venue: &str,
        records: &[(PeriodBucket, CurrencyDiffRecord)],
    ) -> PersistenceResult<()>;

    async fn load(&self, venue: &str)
        -> PersistenceResult<Vec<(PeriodBucket, CurrencyDiffRecord)>>;
}
