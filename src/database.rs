use crate::prelude::*;
use crate::normalizer::NormalizedReading;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const TABLE: &str = "measurements";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One stored sample. Values follow channel map order; `None` means the
/// column exists but the row has no value for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub timestamp: String,
    pub values: Vec<(String, Option<f64>)>,
}

impl MeasurementRecord {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, value)| *value)
    }
}

#[derive(Clone)]
pub struct Database {
    channel_map: Arc<ChannelMap>,
    clock: Arc<dyn Clock>,
    pool: Pool<Sqlite>,
    schema_ready: Arc<AtomicBool>,
}

impl Database {
    /// Prepares a pool for the store at `location`. No connection is opened
    /// until the first operation, which creates the file if needed.
    pub fn new(location: &str, channel_map: Arc<ChannelMap>, clock: Arc<dyn Clock>) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(location)
            .create_if_missing(true);

        // single writer, single process
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_lazy_with(options);

        Self {
            channel_map,
            clock,
            pool,
            schema_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the measurement table if absent and adds any channel column
    /// it is missing. Existing columns are never altered or removed.
    pub async fn ensure_schema(&self) -> Result<(), PersistFailure> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&self.create_table_sql()).execute(&mut *tx).await?;

        let existing = Self::table_columns(&mut *tx).await?;
        for channel in self.channel_map.iter() {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(channel.name())) {
                continue;
            }
            info!("adding column {} to {}", channel.name(), TABLE);
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} REAL",
                TABLE,
                quote(channel.name())
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.schema_ready.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Stores `reading` under the current wall-clock second and returns the
    /// timestamp used.
    pub async fn append(&self, reading: &NormalizedReading) -> Result<String, PersistFailure> {
        let timestamp = self.clock.wall().format(TIMESTAMP_FORMAT).to_string();
        self.insert(&timestamp, reading).await?;
        Ok(timestamp)
    }

    /// Inserts one row in its own transaction. Nothing is committed unless
    /// the insert succeeds; there is no retry.
    pub async fn insert(&self, timestamp: &str, reading: &NormalizedReading) -> Result<(), PersistFailure> {
        if reading.is_empty() {
            return Err(PersistFailure::EmptyReading);
        }
        if let Some((name, _)) = reading.iter().find(|(name, _)| !self.channel_map.contains_name(name)) {
            return Err(PersistFailure::UnknownChannel(name.to_string()));
        }

        if !self.schema_ready.load(Ordering::SeqCst) {
            self.ensure_schema().await?;
        }

        let query = self.insert_sql(reading);
        let mut tx = self.pool.begin().await?;

        let mut insert = sqlx::query(&query).bind(timestamp);
        for (_, value) in reading.iter() {
            insert = insert.bind(value);
        }

        match insert.execute(&mut *tx).await {
            Ok(_) => {
                tx.commit().await?;
                debug!("stored {} values at {}", reading.len(), timestamp);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback after failed insert also failed: {}", rollback);
                }
                Err(err.into())
            }
        }
    }

    pub async fn columns(&self) -> Result<Vec<String>, PersistFailure> {
        let mut conn = self.pool.acquire().await?;
        Self::table_columns(&mut *conn).await
    }

    pub async fn count(&self) -> Result<i64, PersistFailure> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", TABLE))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn records(&self) -> Result<Vec<MeasurementRecord>, PersistFailure> {
        // an unknown quoted identifier reads back as a string literal in sqlite
        if !self.schema_ready.load(Ordering::SeqCst) {
            self.ensure_schema().await?;
        }

        let rows = sqlx::query(&self.select_sql())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<MeasurementRecord, PersistFailure> {
                let mut values = Vec::with_capacity(self.channel_map.len());
                for channel in self.channel_map.iter() {
                    values.push((channel.name().to_string(), row.try_get(channel.name())?));
                }
                Ok(MeasurementRecord {
                    timestamp: row.try_get(crate::channel_map::TIMESTAMP_COLUMN)?,
                    values,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn table_columns(conn: &mut sqlx::SqliteConnection) -> Result<Vec<String>, PersistFailure> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(TABLE)
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(PersistFailure::from))
            .collect()
    }

    fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .channel_map
            .iter()
            .map(|channel| format!("{} REAL", quote(channel.name())))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {})",
            TABLE,
            quote(crate::channel_map::TIMESTAMP_COLUMN),
            columns.join(", ")
        )
    }

    // column names match case-insensitively, so alias each one back to the
    // name the channel map uses
    fn select_sql(&self) -> String {
        let columns: Vec<String> = self
            .channel_map
            .iter()
            .map(|channel| format!("{0} AS {0}", quote(channel.name())))
            .collect();

        format!(
            "SELECT {0}, {1} FROM {2} ORDER BY {0}",
            quote(crate::channel_map::TIMESTAMP_COLUMN),
            columns.join(", "),
            TABLE
        )
    }

    fn insert_sql(&self, reading: &NormalizedReading) -> String {
        let columns: Vec<String> = reading.iter().map(|(name, _)| quote(name)).collect();
        let placeholders = vec!["?"; reading.len() + 1].join(", ");

        format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            TABLE,
            quote(crate::channel_map::TIMESTAMP_COLUMN),
            columns.join(", "),
            placeholders
        )
    }
}

// channel names are validated identifiers; quoting keeps keywords usable
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}
