mod credentials;
mod notifiers;
mod releases;
mod settings;
mod trackers;
mod users;

pub use releases::ReleaseFilter;

use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::crypto::TokenCipher;

/// Embedded single-file relational store shared by the scheduler and the
/// admin API. Cheap to clone; connections come from the pool per call.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    cipher: TokenCipher,
    db_path: String,
}

impl Store {
    /// Opens (creating if needed) the database file and applies pending
    /// migrations. Failure here is fatal to the process.
    pub async fn open(path: &Path, cipher: TokenCipher) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create data directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("cannot open database {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("database migration failed")?;

        info!("store ready at {}", path.display());
        Ok(Self {
            pool,
            cipher,
            db_path: path.display().to_string(),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }
}

/// All timestamps are written as fixed-width RFC 3339 UTC so that string
/// ordering in SQL matches chronological ordering.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("bad timestamp {raw:?}: {e}").into()))
}

pub(crate) fn decode_ts_opt(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    raw.map(decode_ts).transpose()
}
