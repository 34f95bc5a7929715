// src/persistence/sqlite.rs
use crate::domain::errors::{PersistenceError, PersistenceResult};
use crate::domain::models::{ComparisonKind, CurrencyDiffRecord, PeriodBucket};
use crate::persistence::PersistenceGateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// SQLite-backed persistence gateway. Writes are small (at most 110 rows
/// per venue) so they run on the caller's task behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS currency_diffs (
                venue TEXT NOT NULL,
                period TEXT NOT NULL,
                symbol TEXT NOT NULL,
                comparison_kind TEXT NOT NULL,
                best_percent TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                volume TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (venue, period, symbol)
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn save(
        &self,
        venue: &str,
        records: &[(PeriodBucket, CurrencyDiffRecord)],
    ) -> PersistenceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM currency_diffs WHERE venue = ?1", params![venue])?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO currency_diffs
                 (venue, period, symbol, comparison_kind, best_percent,
                  buy_price, sell_price, volume, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for (bucket, record) in records {
                stmt.execute(params![
                    venue,
                    bucket.as_str(),
                    record.symbol,
                    record.comparison_kind.as_str(),
                    record.best_percent.to_string(),
                    record.buy_price.to_string(),
                    record.sell_price.to_string(),
                    record.volume.to_string(),
                    record.last_updated.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn load(
        &self,
        venue: &str,
    ) -> PersistenceResult<Vec<(PeriodBucket, CurrencyDiffRecord)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT period, symbol, comparison_kind, best_percent,
                    buy_price, sell_price, volume, last_updated
             FROM currency_diffs WHERE venue = ?1",
        )?;

        let rows = stmt.query_map(params![venue], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (period, symbol, kind, percent, buy, sell, volume, updated) = row?;

            let bucket = PeriodBucket::parse(&period)
                .ok_or_else(|| PersistenceError::Corrupt(format!("period '{}'", period)))?;
            let comparison_kind = ComparisonKind::parse(&kind)
                .ok_or_else(|| PersistenceError::Corrupt(format!("comparison kind '{}'", kind)))?;
            let last_updated = DateTime::parse_from_rfc3339(&updated)
                .map_err(|e| PersistenceError::Corrupt(format!("timestamp '{}': {}", updated, e)))?
                .with_timezone(&Utc);

            records.push((
                bucket,
                CurrencyDiffRecord {
                    symbol,
                    comparison_kind,
                    best_percent: parse_decimal(&percent)?,
                    buy_price: parse_decimal(&buy)?,
                    sell_price: parse_decimal(&sell)?,
                    volume: parse_decimal(&volume)?,
                    last_updated,
                },
            ));
        }

        Ok(records)
    }
}

fn parse_decimal(raw: &str) -> PersistenceResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| PersistenceError::Corrupt(format!("decimal '{}': {}", raw, e)))
}
