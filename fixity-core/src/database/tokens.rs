use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::{FixityError, Result};

/// Identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MachineIdentity {
    pub machine_id: i64,
    pub machine_name: String,
}

/// Token metadata; the token itself is never stored or listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct TokenSummary {
    pub machine_id: i64,
    pub machine_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteTokenStore").finish_non_exhaustive()
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Issue a fresh token for `machine_name`, replacing any previous one.
    pub async fn create_or_rotate(&self, machine_name: &str) -> Result<String> {
        let machine_name = machine_name.trim();
        if machine_name.is_empty() {
            return Err(FixityError::InvalidInput(
                "machine name must not be empty".into(),
            ));
        }

        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO auth_token (machine_name, token_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (machine_name)
            DO UPDATE SET token_hash = excluded.token_hash,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(machine_name)
        .bind(token_digest(&token))
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(machine_name, "machine token issued");
        Ok(token)
    }

    pub async fn machine_for_token(
        &self,
        token: &str,
    ) -> Result<Option<MachineIdentity>> {
        let identity = sqlx::query_as::<_, MachineIdentity>(
            "SELECT machine_id, machine_name FROM auth_token WHERE token_hash = ?",
        )
        .bind(token_digest(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    /// Returns whether a token existed.
    pub async fn delete(&self, machine_name: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM auth_token WHERE machine_name = ?")
                .bind(machine_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<TokenSummary>> {
        let rows = sqlx::query_as::<_, TokenSummary>(
            r#"
            SELECT machine_id, machine_name, created_at, updated_at
            FROM auth_token
            ORDER BY machine_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
