use chrono::Utc;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

use crate::error::TrackError;
use crate::model::{NotificationEvent, Notifier};

use super::{Store, decode_ts, encode_ts};

fn row_to_notifier(row: &SqliteRow) -> Result<Notifier, TrackError> {
    let events_json: String = row.try_get("events").map_err(TrackError::Store)?;
    let events: Vec<NotificationEvent> = serde_json::from_str(&events_json).unwrap_or_else(|e| {
        warn!("dropping unreadable notifier events column: {e}");
        vec![NotificationEvent::NewRelease]
    });
    Ok(Notifier {
        id: Some(row.try_get("id").map_err(TrackError::Store)?),
        name: row.try_get("name").map_err(TrackError::Store)?,
        kind: row.try_get("type").map_err(TrackError::Store)?,
        url: row.try_get("url").map_err(TrackError::Store)?,
        events,
        enabled: row.try_get::<i64, _>("enabled").map_err(TrackError::Store)? != 0,
        description: row.try_get("description").map_err(TrackError::Store)?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at").map_err(TrackError::Store)?)?,
        updated_at: decode_ts(&row.try_get::<String, _>("updated_at").map_err(TrackError::Store)?)?,
    })
}

impl Store {
    pub async fn create_notifier(&self, notifier: &Notifier) -> Result<i64, TrackError> {
        let now = encode_ts(Utc::now());
        let events_json =
            serde_json::to_string(&notifier.events).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(
            "INSERT INTO notifiers (name, type, url, events, enabled, description, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notifier.name)
        .bind(&notifier.kind)
        .bind(&notifier.url)
        .bind(&events_json)
        .bind(notifier.enabled as i64)
        .bind(&notifier.description)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(result.last_insert_rowid())
    }

    /// Full set, for the aggregated config snapshot.
    pub async fn get_notifiers(&self) -> Result<Vec<Notifier>, TrackError> {
        let rows = sqlx::query("SELECT * FROM notifiers ORDER BY name ASC")
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(row_to_notifier).collect()
    }

    /// Enabled notifiers subscribed to `event`, read at dispatch time.
    /// The fan-out never caches this set: runtime edits must take effect
    /// on the very next event.
    pub async fn notifiers_for_event(
        &self,
        event: NotificationEvent,
    ) -> Result<Vec<Notifier>, TrackError> {
        let notifiers = sqlx::query("SELECT * FROM notifiers WHERE enabled = 1")
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        notifiers
            .iter()
            .map(row_to_notifier)
            .filter(|n| match n {
                Ok(n) => n.events.contains(&event),
                Err(_) => true,
            })
            .collect()
    }

    pub async fn get_notifier(&self, id: i64) -> Result<Option<Notifier>, TrackError> {
        let row = sqlx::query("SELECT * FROM notifiers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_notifier).transpose()
    }

    pub async fn get_notifier_by_name(&self, name: &str) -> Result<Option<Notifier>, TrackError> {
        let row = sqlx::query("SELECT * FROM notifiers WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_notifier).transpose()
    }

    pub async fn get_notifiers_paginated(
        &self,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Notifier>, TrackError> {
        let rows = sqlx::query("SELECT * FROM notifiers ORDER BY name ASC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(row_to_notifier).collect()
    }

    pub async fn count_notifiers(&self) -> Result<i64, TrackError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM notifiers")
            .fetch_one(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.try_get("n").map_err(TrackError::Store)
    }

    pub async fn update_notifier(&self, id: i64, notifier: &Notifier) -> Result<bool, TrackError> {
        let now = encode_ts(Utc::now());
        let events_json =
            serde_json::to_string(&notifier.events).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(
            "UPDATE notifiers SET name = ?, type = ?, url = ?, events = ?, enabled = ?, \
             description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&notifier.name)
        .bind(&notifier.kind)
        .bind(&notifier.url)
        .bind(&events_json)
        .bind(notifier.enabled as i64)
        .bind(&notifier.description)
        .bind(&now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_notifier(&self, id: i64) -> Result<bool, TrackError> {
        let result = sqlx::query("DELETE FROM notifiers WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(result.rows_affected() > 0)
    }
}
