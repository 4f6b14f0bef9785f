use chrono::Utc;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;

use crate::error::TrackError;
use crate::model::Credential;

use super::{Store, decode_ts, encode_ts};

impl Store {
    /// Stores a credential, encrypting the token at rest. Returns the new
    /// row id.
    pub async fn create_credential(&self, credential: &Credential) -> Result<i64, TrackError> {
        let now = encode_ts(Utc::now());
        let stored_token = self.cipher().encrypt(&credential.token);
        let result = sqlx::query(
            "INSERT INTO credentials (name, type, token, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.name)
        .bind(&credential.kind)
        .bind(&stored_token)
        .bind(&credential.description)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_credential(&self, id: i64) -> Result<Option<Credential>, TrackError> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(|r| self.row_to_credential(r)).transpose()
    }

    /// Lookup used by the credential resolver: tokens come back already
    /// decrypted so adapters never see ciphertext.
    pub async fn get_credential_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Credential>, TrackError> {
        let row = sqlx::query("SELECT * FROM credentials WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(|r| self.row_to_credential(r)).transpose()
    }

    pub async fn get_credentials_paginated(
        &self,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Credential>, TrackError> {
        let rows = sqlx::query("SELECT * FROM credentials ORDER BY name ASC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(self.pool())
            .await
            .map_err(TrackError::Store)?;
        rows.iter().map(|r| self.row_to_credential(r)).collect()
    }

    pub async fn count_credentials(&self) -> Result<i64, TrackError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM credentials")
            .fetch_one(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.try_get("n").map_err(TrackError::Store)
    }

    /// Updates kind/description, and the token only when a new one is
    /// given; the name is immutable.
    pub async fn update_credential(
        &self,
        id: i64,
        kind: &str,
        token: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool, TrackError> {
        let now = encode_ts(Utc::now());
        let result = match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                let stored = self.cipher().encrypt(token);
                sqlx::query(
                    "UPDATE credentials SET type = ?, token = ?, description = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(kind)
                .bind(&stored)
                .bind(description)
                .bind(&now)
                .bind(id)
                .execute(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE credentials SET type = ?, description = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(kind)
                .bind(description)
                .bind(&now)
                .bind(id)
                .execute(self.pool())
                .await
            }
        }
        .map_err(TrackError::Store)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_credential(&self, id: i64) -> Result<bool, TrackError> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_credential(&self, row: &SqliteRow) -> Result<Credential, TrackError> {
        let stored_token: String = row.try_get("token").map_err(TrackError::Store)?;
        Ok(Credential {
            id: Some(row.try_get("id").map_err(TrackError::Store)?),
            name: row.try_get("name").map_err(TrackError::Store)?,
            kind: row.try_get("type").map_err(TrackError::Store)?,
            token: self.cipher().decrypt(&stored_token),
            description: row.try_get("description").map_err(TrackError::Store)?,
            created_at: decode_ts(&row.try_get::<String, _>("created_at").map_err(TrackError::Store)?)?,
            updated_at: decode_ts(&row.try_get::<String, _>("updated_at").map_err(TrackError::Store)?)?,
        })
    }
}
