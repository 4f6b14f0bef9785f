use chrono::Utc;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

use crate::error::TrackError;
use crate::model::{Channel, TrackerConfig, TrackerKind, TrackerStatus};

use super::{Store, decode_ts_opt, encode_ts};

fn row_to_config(row: &SqliteRow) -> Result<TrackerConfig, TrackError> {
    let name: String = row.try_get("name").map_err(TrackError::Store)?;
    let kind_label: String = row.try_get("type").map_err(TrackError::Store)?;
    let repo: Option<String> = row.try_get("repo").map_err(TrackError::Store)?;
    let project: Option<String> = row.try_get("project").map_err(TrackError::Store)?;
    let instance: Option<String> = row.try_get("instance").map_err(TrackError::Store)?;
    let chart: Option<String> = row.try_get("chart").map_err(TrackError::Store)?;

    // The kind column is only ever written through TrackerKind, so an
    // unknown label means row corruption, not a dispatch choice.
    let kind = match kind_label.as_str() {
        "github" => TrackerKind::Github {
            repo: repo.ok_or_else(|| TrackError::Config(format!("tracker {name}: no repo")))?,
        },
        "gitlab" => TrackerKind::Gitlab {
            project: project
                .ok_or_else(|| TrackError::Config(format!("tracker {name}: no project")))?,
            instance: instance.unwrap_or_else(|| "https://gitlab.com".to_string()),
        },
        "helm" => TrackerKind::Helm {
            repo: repo.ok_or_else(|| TrackError::Config(format!("tracker {name}: no repo")))?,
            chart: chart.ok_or_else(|| TrackError::Config(format!("tracker {name}: no chart")))?,
        },
        other => {
            return Err(TrackError::Config(format!(
                "tracker {name}: unknown kind {other:?}"
            )));
        }
    };

    let channels_json: String = row.try_get("channels").map_err(TrackError::Store)?;
    let channels: Vec<Channel> = serde_json::from_str(&channels_json).unwrap_or_else(|e| {
        warn!("tracker {name}: dropping unreadable channels column: {e}");
        Vec::new()
    });

    Ok(TrackerConfig {
        name,
        kind,
        enabled: row.try_get::<i64, _>("enabled").map_err(TrackError::Store)? != 0,
        interval_minutes: row
            .try_get::<i64, _>("interval_minutes")
            .map_err(TrackError::Store)?
            .max(1) as u32,
        credential_name: row.try_get("credential_name").map_err(TrackError::Store)?,
        channels,
    })
}

fn row_to_status(row: &SqliteRow) -> Result<TrackerStatus, TrackError> {
    Ok(TrackerStatus {
        name: row.try_get("name").map_err(TrackError::Store)?,
        kind: row.try_get("type").map_err(TrackError::Store)?,
        enabled: row.try_get::<i64, _>("enabled").map_err(TrackError::Store)? != 0,
        last_check: decode_ts_opt(
            row.try_get::<Option<String>, _>("last_check")
                .map_err(TrackError::Store)?
                .as_deref(),
        )?,
        last_version: row.try_get("last_version").map_err(TrackError::Store)?,
        error: row.try_get("error").map_err(TrackError::Store)?,
        channel_count: 0,
    })
}

impl Store {
    /// Insert-or-replace by name.
    pub async fn save_tracker_config(&self, config: &TrackerConfig) -> Result<(), TrackError> {
        let (repo, project, instance, chart) = match &config.kind {
            TrackerKind::Github { repo } => (Some(repo.as_str()), None, None, None),
            TrackerKind::Gitlab { project, instance } => {
                (None, Some(project.as_str()), Some(instance.as_str()), None)
            }
            TrackerKind::Helm { repo, chart } => {
                (Some(repo.as_str()), None, None, Some(chart.as_str()))
            }
        };
        let channels_json =
            serde_json::to_string(&config.channels).unwrap_or_else(|_| "[]".to_string());
        let now = encode_ts(Utc::now());

        sqlx::query(
            "INSERT INTO trackers \
             (name, type, enabled, repo, project, instance, chart, credential_name, \
              channels, interval_minutes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
               type = excluded.type, enabled = excluded.enabled, repo = excluded.repo, \
               project = excluded.project, instance = excluded.instance, \
               chart = excluded.chart, credential_name = excluded.credential_name, \
               channels = excluded.channels, interval_minutes = excluded.interval_minutes, \
               updated_at = excluded.updated_at",
        )
        .bind(&config.name)
        .bind(config.kind.label())
        .bind(config.enabled as i64)
        .bind(repo)
        .bind(project)
        .bind(instance)
        .bind(chart)
        .bind(&config.credential_name)
        .bind(&channels_json)
        .bind(config.interval_minutes as i64)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(())
    }

    pub async fn get_all_tracker_configs(&self) -> Result<Vec<TrackerConfig>, TrackError> {
        let rows = sqlx::query("SELECT * FROM trackers ORDER BY name ASC")
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(row_to_config).collect()
    }

    pub async fn get_tracker_configs_paginated(
        &self,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<TrackerConfig>, TrackError> {
        let rows = sqlx::query("SELECT * FROM trackers ORDER BY name ASC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(row_to_config).collect()
    }

    pub async fn count_tracker_configs(&self) -> Result<i64, TrackError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trackers")
            .fetch_one(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.try_get("n").map_err(TrackError::Store)
    }

    pub async fn get_tracker_config(
        &self,
        name: &str,
    ) -> Result<Option<TrackerConfig>, TrackError> {
        let row = sqlx::query("SELECT * FROM trackers WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_config).transpose()
    }

    pub async fn delete_tracker_config(&self, name: &str) -> Result<(), TrackError> {
        sqlx::query("DELETE FROM trackers WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }

    /// Rewritten after every check.
    pub async fn update_tracker_status(&self, status: &TrackerStatus) -> Result<(), TrackError> {
        sqlx::query(
            "INSERT OR REPLACE INTO tracker_status \
             (name, type, enabled, last_check, last_version, error) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&status.name)
        .bind(&status.kind)
        .bind(status.enabled as i64)
        .bind(status.last_check.map(encode_ts))
        .bind(&status.last_version)
        .bind(&status.error)
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(())
    }

    pub async fn get_tracker_status(
        &self,
        name: &str,
    ) -> Result<Option<TrackerStatus>, TrackError> {
        let row = sqlx::query("SELECT * FROM tracker_status WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_status).transpose()
    }

    pub async fn get_all_tracker_status(&self) -> Result<Vec<TrackerStatus>, TrackError> {
        let rows = sqlx::query("SELECT * FROM tracker_status")
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(row_to_status).collect()
    }

    pub async fn delete_tracker_status(&self, name: &str) -> Result<(), TrackError> {
        sqlx::query("DELETE FROM tracker_status WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }
}
