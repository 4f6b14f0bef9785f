use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row as _;

use crate::error::TrackError;

use super::{Store, encode_ts};

impl Store {
    pub async fn get_all_settings(&self) -> Result<BTreeMap<String, String>, TrackError> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key ASC")
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("key").map_err(TrackError::Store)?,
                    row.try_get("value").map_err(TrackError::Store)?,
                ))
            })
            .collect()
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, TrackError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.map(|r| r.try_get("value").map_err(TrackError::Store)).transpose()
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), TrackError> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(encode_ts(Utc::now()))
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<(), TrackError> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }
}
