use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::channel;
use crate::error::TrackError;
use crate::model::{Channel, ChannelName, DailyStat, Release, ReleaseStats, SaveVerdict};
use crate::republish;

use super::{Store, decode_ts, encode_ts};

/// Filters for the paginated release listing.
#[derive(Debug, Default, Clone)]
pub struct ReleaseFilter {
    pub tracker: Option<String>,
    pub search: Option<String>,
    pub prerelease: Option<bool>,
    pub include_history: bool,
}

impl ReleaseFilter {
    /// WHERE clause over the given column prefix; text operands are pushed
    /// onto `params` in placeholder order.
    fn where_clause(&self, prefix: &str, params: &mut Vec<String>) -> String {
        let mut conditions = Vec::new();
        if let Some(tracker) = &self.tracker {
            conditions.push(format!("{prefix}tracker_name = ?"));
            params.push(tracker.clone());
        }
        if let Some(search) = &self.search {
            conditions.push(format!(
                "({prefix}tracker_name LIKE ? OR {prefix}name LIKE ? OR \
                 {prefix}tag_name LIKE ? OR {prefix}version LIKE ?)"
            ));
            let pattern = format!("%{search}%");
            params.extend(std::iter::repeat_n(pattern, 4));
        }
        if let Some(prerelease) = self.prerelease {
            conditions.push(format!("{prefix}prerelease = {}", prerelease as i64));
        }
        if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        }
    }
}

const CURRENT_COLUMNS: &str = "id, tracker_name, name, tag_name, version, published_at, url, \
     prerelease, body, channel_name, commit_sha, republish_count, created_at";

/// Historical snapshots inherit the identity columns of their current row;
/// publication time, notes and commit come from the snapshot.
const HISTORY_COLUMNS: &str = "r.id, r.tracker_name, COALESCE(h.name, r.name) AS name, \
     r.tag_name, r.version, h.published_at, r.url, r.prerelease, h.body, \
     COALESCE(h.channel_name, r.channel_name) AS channel_name, h.commit_sha, \
     r.republish_count, h.recorded_at AS created_at";

fn row_to_release(row: &SqliteRow) -> Result<Release, sqlx::Error> {
    Ok(Release {
        id: Some(row.try_get("id")?),
        tracker_name: row.try_get("tracker_name")?,
        name: row.try_get("name")?,
        tag_name: row.try_get("tag_name")?,
        version: row.try_get("version")?,
        published_at: decode_ts(&row.try_get::<String, _>("published_at")?)?,
        url: row.try_get("url")?,
        prerelease: row.try_get::<i64, _>("prerelease")? != 0,
        body: row.try_get("body")?,
        channel_name: row
            .try_get::<Option<String>, _>("channel_name")?
            .as_deref()
            .and_then(ChannelName::parse),
        commit_sha: row.try_get("commit_sha")?,
        republish_count: row.try_get("republish_count")?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

impl Store {
    /// Atomic insert-or-update on `(tracker_name, tag_name)`.
    ///
    /// A uniqueness violation is not an error: the existing row is read
    /// back inside the same transaction, the republish detector classifies
    /// the save, and a republish snapshots the old row into
    /// `release_history` before the overwrite.
    pub async fn save_release(&self, release: &Release) -> Result<SaveVerdict, TrackError> {
        let mut tx = self.pool().begin().await?;
        let new_commit = release.commit_sha.as_deref().filter(|s| !s.is_empty());
        let channel_name = release.channel_name.map(ChannelName::as_str);
        let now = encode_ts(Utc::now());

        let insert = sqlx::query(
            "INSERT INTO releases \
             (tracker_name, name, tag_name, version, published_at, url, prerelease, \
              body, channel_name, commit_sha, republish_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&release.tracker_name)
        .bind(&release.name)
        .bind(&release.tag_name)
        .bind(&release.version)
        .bind(encode_ts(release.published_at))
        .bind(&release.url)
        .bind(release.prerelease as i64)
        .bind(&release.body)
        .bind(channel_name)
        .bind(new_commit)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                tx.commit().await.map_err(TrackError::Store)?;
                return Ok(SaveVerdict::New);
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {}
            Err(e) => return Err(e.into()),
        }

        let old = sqlx::query(
            "SELECT id, name, commit_sha, published_at, body, republish_count, channel_name \
             FROM releases WHERE tracker_name = ? AND tag_name = ?",
        )
        .bind(&release.tracker_name)
        .bind(&release.tag_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(TrackError::Store)?;

        let old_id: i64 = old.try_get("id").map_err(TrackError::Store)?;
        let old_commit: Option<String> = old.try_get("commit_sha").map_err(TrackError::Store)?;
        let old_published =
            decode_ts(&old.try_get::<String, _>("published_at").map_err(TrackError::Store)?)?;
        let old_count: i64 = old.try_get("republish_count").map_err(TrackError::Store)?;

        let republished = republish::is_republish(
            old_commit.as_deref(),
            new_commit,
            old_published,
            release.published_at,
        );

        if republished {
            debug!(
                tracker = %release.tracker_name,
                tag = %release.tag_name,
                "republish: {:?} -> {:?}",
                old_commit, new_commit
            );
            sqlx::query(
                "INSERT INTO release_history \
                 (release_id, name, commit_sha, published_at, body, channel_name, recorded_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(old_id)
            .bind(old.try_get::<Option<String>, _>("name").map_err(TrackError::Store)?)
            .bind(&old_commit)
            .bind(encode_ts(old_published))
            .bind(old.try_get::<Option<String>, _>("body").map_err(TrackError::Store)?)
            .bind(old.try_get::<Option<String>, _>("channel_name").map_err(TrackError::Store)?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(TrackError::Store)?;

            sqlx::query(
                "UPDATE releases SET name = ?, version = ?, published_at = ?, url = ?, \
                 prerelease = ?, body = ?, channel_name = ?, commit_sha = ?, republish_count = ? \
                 WHERE id = ?",
            )
            .bind(&release.name)
            .bind(&release.version)
            .bind(encode_ts(release.published_at))
            .bind(&release.url)
            .bind(release.prerelease as i64)
            .bind(&release.body)
            .bind(channel_name)
            .bind(new_commit)
            .bind(old_count + 1)
            .bind(old_id)
            .execute(&mut *tx)
            .await
            .map_err(TrackError::Store)?;

            tx.commit().await.map_err(TrackError::Store)?;
            Ok(SaveVerdict::Republish { old_commit })
        } else {
            // Metadata-only refresh; an empty incoming SHA keeps the
            // stored one.
            sqlx::query(
                "UPDATE releases SET name = ?, version = ?, published_at = ?, url = ?, \
                 prerelease = ?, body = ?, channel_name = ?, \
                 commit_sha = COALESCE(?, commit_sha) \
                 WHERE id = ?",
            )
            .bind(&release.name)
            .bind(&release.version)
            .bind(encode_ts(release.published_at))
            .bind(&release.url)
            .bind(release.prerelease as i64)
            .bind(&release.body)
            .bind(channel_name)
            .bind(new_commit)
            .bind(old_id)
            .execute(&mut *tx)
            .await
            .map_err(TrackError::Store)?;

            tx.commit().await.map_err(TrackError::Store)?;
            Ok(SaveVerdict::Metadata)
        }
    }

    /// Paginated listing, newest publication first. With
    /// `include_history` the result is the union of current rows and
    /// historical snapshots.
    pub async fn get_releases(
        &self,
        filter: &ReleaseFilter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Release>, TrackError> {
        let mut params = Vec::new();
        let sql = if filter.include_history {
            let current_where = filter.where_clause("", &mut params);
            let history_where = filter.where_clause("r.", &mut params);
            format!(
                "SELECT * FROM ( \
                   SELECT {CURRENT_COLUMNS} FROM releases WHERE {current_where} \
                   UNION ALL \
                   SELECT {HISTORY_COLUMNS} FROM release_history h \
                     JOIN releases r ON h.release_id = r.id WHERE {history_where} \
                 ) ORDER BY published_at DESC LIMIT {limit} OFFSET {skip}"
            )
        } else {
            let current_where = filter.where_clause("", &mut params);
            format!(
                "SELECT {CURRENT_COLUMNS} FROM releases WHERE {current_where} \
                 ORDER BY published_at DESC LIMIT {limit} OFFSET {skip}"
            )
        };

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param.as_str());
        }
        let rows = query.fetch_all(self.pool()).await.map_err(TrackError::Store)?;
        rows.iter()
            .map(|r| row_to_release(r).map_err(TrackError::Store))
            .collect()
    }

    /// Matching total for the same filter, for pagination envelopes.
    pub async fn count_releases(&self, filter: &ReleaseFilter) -> Result<i64, TrackError> {
        let mut params = Vec::new();
        let sql = if filter.include_history {
            let current_where = filter.where_clause("", &mut params);
            let history_where = filter.where_clause("r.", &mut params);
            format!(
                "SELECT COUNT(*) AS n FROM ( \
                   SELECT id FROM releases WHERE {current_where} \
                   UNION ALL \
                   SELECT r.id FROM release_history h \
                     JOIN releases r ON h.release_id = r.id WHERE {history_where} \
                 )"
            )
        } else {
            let current_where = filter.where_clause("", &mut params);
            format!("SELECT COUNT(*) AS n FROM releases WHERE {current_where}")
        };

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param.as_str());
        }
        let row = query.fetch_one(self.pool()).await.map_err(TrackError::Store)?;
        row.try_get("n").map_err(TrackError::Store)
    }

    /// Up to `limit_per_tracker` most-recent current rows per tracker in a
    /// single windowed query, so the tracker list avoids N+1 reads.
    pub async fn releases_for_trackers_bulk(
        &self,
        names: &[String],
        limit_per_tracker: usize,
    ) -> Result<HashMap<String, Vec<Release>>, TrackError> {
        let mut result: HashMap<String, Vec<Release>> =
            names.iter().map(|n| (n.clone(), Vec::new())).collect();
        if names.is_empty() {
            return Ok(result);
        }

        let placeholders = vec!["?"; names.len()].join(",");
        let sql = format!(
            "SELECT * FROM ( \
               SELECT {CURRENT_COLUMNS}, ROW_NUMBER() OVER \
                 (PARTITION BY tracker_name ORDER BY published_at DESC) AS rn \
               FROM releases WHERE tracker_name IN ({placeholders}) \
             ) WHERE rn <= {limit_per_tracker}"
        );

        let mut query = sqlx::query(&sql);
        for name in names {
            query = query.bind(name.as_str());
        }
        let rows = query.fetch_all(self.pool()).await.map_err(TrackError::Store)?;
        for row in &rows {
            let release = row_to_release(row).map_err(TrackError::Store)?;
            result.entry(release.tracker_name.clone()).or_default().push(release);
        }
        Ok(result)
    }

    /// Global most-recent current releases.
    pub async fn latest_releases(&self, limit: usize) -> Result<Vec<Release>, TrackError> {
        self.get_releases(&ReleaseFilter::default(), 0, limit).await
    }

    /// Headline version of a tracker: channel filter over the most recent
    /// current rows, newest surviving candidate wins.
    pub async fn latest_release_for_channels(
        &self,
        tracker_name: &str,
        channels: &[Channel],
    ) -> Result<Option<Release>, TrackError> {
        let filter = ReleaseFilter {
            tracker: Some(tracker_name.to_string()),
            ..ReleaseFilter::default()
        };
        let releases = self.get_releases(&filter, 0, 100).await?;
        Ok(channel::select_best_release(&releases, channels))
    }

    pub async fn delete_releases_by_tracker(&self, tracker_name: &str) -> Result<(), TrackError> {
        sqlx::query("DELETE FROM releases WHERE tracker_name = ?")
            .bind(tracker_name)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }

    /// Dashboard aggregates. Daily buckets are computed in `tz`, covering
    /// today and the six days before it; empty days are filled with zero.
    pub async fn stats(&self, tz: Tz) -> Result<ReleaseStats, TrackError> {
        let pool = self.pool();

        let total_trackers: i64 = sqlx::query("SELECT COUNT(*) AS n FROM tracker_status")
            .fetch_one(pool)
            .await
            .map_err(TrackError::Store)?
            .try_get("n")
            .map_err(TrackError::Store)?;

        let totals = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM releases) AS current, \
                    (SELECT COUNT(*) FROM release_history) AS historical",
        )
        .fetch_one(pool)
        .await
        .map_err(TrackError::Store)?;
        let total_releases = totals.try_get::<i64, _>("current").map_err(TrackError::Store)?
            + totals.try_get::<i64, _>("historical").map_err(TrackError::Store)?;

        let yesterday = encode_ts(Utc::now() - Duration::days(1));
        let recent_releases: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM releases WHERE created_at > ?")
                .bind(&yesterday)
                .fetch_one(pool)
                .await
                .map_err(TrackError::Store)?
                .try_get("n")
                .map_err(TrackError::Store)?;

        let latest_update = sqlx::query("SELECT MAX(published_at) AS latest FROM releases")
            .fetch_one(pool)
            .await
            .map_err(TrackError::Store)?
            .try_get::<Option<String>, _>("latest")
            .map_err(TrackError::Store)?
            .as_deref()
            .map(decode_ts)
            .transpose()?;

        let daily_stats = self.daily_stats(tz).await?;

        let mut channel_stats = BTreeMap::new();
        let channel_rows = sqlx::query(
            "SELECT CASE \
                WHEN channel_name IS NOT NULL AND channel_name != '' THEN channel_name \
                WHEN prerelease = 1 THEN 'prerelease' \
                ELSE 'stable' \
             END AS ch, COUNT(*) AS n \
             FROM ( \
               SELECT channel_name, prerelease FROM releases \
               UNION ALL \
               SELECT COALESCE(h.channel_name, r.channel_name) AS channel_name, r.prerelease \
                 FROM release_history h JOIN releases r ON h.release_id = r.id \
             ) GROUP BY ch",
        )
        .fetch_all(pool)
        .await
        .map_err(TrackError::Store)?;
        for row in &channel_rows {
            let name: String = row.try_get("ch").map_err(TrackError::Store)?;
            let count: i64 = row.try_get("n").map_err(TrackError::Store)?;
            channel_stats.insert(name, count);
        }

        let mut release_type_stats = BTreeMap::new();
        let type_rows = sqlx::query(
            "SELECT prerelease, COUNT(*) AS n FROM ( \
               SELECT prerelease FROM releases \
               UNION ALL \
               SELECT r.prerelease FROM release_history h \
                 JOIN releases r ON h.release_id = r.id \
             ) GROUP BY prerelease",
        )
        .fetch_all(pool)
        .await
        .map_err(TrackError::Store)?;
        for row in &type_rows {
            let prerelease = row.try_get::<i64, _>("prerelease").map_err(TrackError::Store)? != 0;
            let count: i64 = row.try_get("n").map_err(TrackError::Store)?;
            let key = if prerelease { "prerelease" } else { "stable" };
            release_type_stats.insert(key.to_string(), count);
        }

        Ok(ReleaseStats {
            total_trackers,
            total_releases,
            recent_releases,
            latest_update,
            daily_stats,
            channel_stats,
            release_type_stats,
        })
    }

    async fn daily_stats(&self, tz: Tz) -> Result<Vec<DailyStat>, TrackError> {
        // A ten-day UTC window comfortably covers seven local days in any
        // timezone; exact bucketing happens after conversion.
        let cutoff = encode_ts(Utc::now() - Duration::days(10));
        let rows = sqlx::query(
            "SELECT published_at, channel_name, prerelease FROM ( \
               SELECT published_at, channel_name, prerelease \
                 FROM releases WHERE published_at >= ? \
               UNION ALL \
               SELECT h.published_at, COALESCE(h.channel_name, r.channel_name) AS channel_name, \
                      r.prerelease \
                 FROM release_history h JOIN releases r ON h.release_id = r.id \
                 WHERE h.published_at >= ? \
             ) ORDER BY published_at ASC",
        )
        .bind(&cutoff)
        .bind(&cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(TrackError::Store)?;

        let today = Utc::now().with_timezone(&tz).date_naive();
        let window_start = today - Duration::days(6);

        let mut buckets: BTreeMap<NaiveDate, BTreeMap<String, i64>> = (0..7)
            .map(|offset| (window_start + Duration::days(offset), BTreeMap::new()))
            .collect();

        for row in &rows {
            let published = decode_ts(&row.try_get::<String, _>("published_at").map_err(TrackError::Store)?)?;
            let local_date = published.with_timezone(&tz).date_naive();
            let Some(channels) = buckets.get_mut(&local_date) else {
                continue;
            };
            let channel = row
                .try_get::<Option<String>, _>("channel_name")
                .map_err(TrackError::Store)?
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| {
                    let prerelease = row.try_get::<i64, _>("prerelease").unwrap_or(0) != 0;
                    if prerelease { "prerelease" } else { "stable" }.to_string()
                });
            *channels.entry(channel).or_insert(0) += 1;
        }

        Ok(buckets
            .into_iter()
            .map(|(date, channels)| DailyStat { date, channels })
            .collect())
    }
}
