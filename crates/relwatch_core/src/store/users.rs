use chrono::Utc;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;

use crate::error::TrackError;
use crate::model::{Session, User};

use super::{Store, decode_ts, decode_ts_opt, encode_ts};

fn row_to_user(row: &SqliteRow) -> Result<User, TrackError> {
    Ok(User {
        id: Some(row.try_get("id").map_err(TrackError::Store)?),
        username: row.try_get("username").map_err(TrackError::Store)?,
        email: row.try_get("email").map_err(TrackError::Store)?,
        password_hash: row.try_get("password_hash").map_err(TrackError::Store)?,
        status: row.try_get("status").map_err(TrackError::Store)?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at").map_err(TrackError::Store)?)?,
        last_login_at: decode_ts_opt(
            row.try_get::<Option<String>, _>("last_login_at")
                .map_err(TrackError::Store)?
                .as_deref(),
        )?,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<Session, TrackError> {
    Ok(Session {
        id: Some(row.try_get("id").map_err(TrackError::Store)?),
        user_id: row.try_get("user_id").map_err(TrackError::Store)?,
        token_hash: row.try_get("token_hash").map_err(TrackError::Store)?,
        refresh_token_hash: row.try_get("refresh_token_hash").map_err(TrackError::Store)?,
        user_agent: row.try_get("user_agent").map_err(TrackError::Store)?,
        ip_address: row.try_get("ip_address").map_err(TrackError::Store)?,
        expires_at: decode_ts(&row.try_get::<String, _>("expires_at").map_err(TrackError::Store)?)?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at").map_err(TrackError::Store)?)?,
    })
}

impl Store {
    pub async fn create_user(&self, user: &User) -> Result<i64, TrackError> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, status, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.status)
        .bind(encode_ts(user.created_at))
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, TrackError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, TrackError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn update_user_password(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, TrackError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_user_login(&self, user_id: i64) -> Result<(), TrackError> {
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(encode_ts(Utc::now()))
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }

    pub async fn create_session(&self, session: &Session) -> Result<i64, TrackError> {
        let result = sqlx::query(
            "INSERT INTO sessions (user_id, token_hash, refresh_token_hash, user_agent, \
             ip_address, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.refresh_token_hash)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(encode_ts(session.expires_at))
        .bind(encode_ts(session.created_at))
        .execute(self.pool())
        .await
        .map_err(TrackError::Store)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_session(&self, token_hash: &str) -> Result<Option<Session>, TrackError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(TrackError::Store)?;
        row.as_ref().map(row_to_session).transpose()
    }

    pub async fn delete_session(&self, token_hash: &str) -> Result<(), TrackError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(())
    }

    /// Session-per-token means rows pile up; the scheduler sweeps the
    /// expired ones periodically.
    pub async fn delete_expired_sessions(&self) -> Result<u64, TrackError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(encode_ts(Utc::now()))
            .execute(self.pool())
            .await
            .map_err(TrackError::Store)?;
        Ok(result.rows_affected())
    }
}
