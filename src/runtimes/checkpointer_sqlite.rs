//! SQLite-backed checkpoint store.
//!
//! Keeps one row per session holding the latest checkpoint. Save ordering
//! is enforced inside the transaction: an incoming step lower than the
//! stored one is a no-op, so retried saves and racing writers cannot roll
//! a session backwards.
//!
//! When the `sqlite-migrations` feature is enabled (default), embedded
//! migrations (`sqlx::migrate!("./migrations")`) run on connect;
//! disabling the feature assumes external migration orchestration.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, Result};
use super::persistence::PersistedCheckpoint;

/// Durable checkpointer over a SQLite connection pool.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `sqlite://taskloom.db`.
    #[must_use = "checkpointer must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> std::result::Result<Self, CheckpointerError> {
        let pool =
            SqlitePool::connect(database_url)
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("connect error: {e}"),
                })?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(CheckpointerError::Backend {
                    message: format!("migration failure: {e}"),
                });
            }
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait::async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let persisted = PersistedCheckpoint::from(&checkpoint);
        let state_json = persisted
            .to_json_string()
            .map_err(|e| CheckpointerError::Other {
                message: format!("checkpoint encode: {e}"),
            })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        let stored_step: Option<i64> =
            sqlx::query_scalar("SELECT step FROM checkpoints WHERE session_id = ?1")
                .bind(&checkpoint.session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("step read: {e}"),
                })?;

        if let Some(stored) = stored_step
            && stored > checkpoint.step as i64
        {
            tracing::debug!(
                session_id = %checkpoint.session_id,
                stored,
                incoming = checkpoint.step,
                "stale checkpoint save ignored"
            );
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                session_id, step, state_json, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&checkpoint.session_id)
        .bind(checkpoint.step as i64)
        .bind(&state_json)
        .bind(&persisted.created_at)
        .bind(&persisted.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointerError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT state_json FROM checkpoints
            WHERE session_id = ?1 AND expires_at > ?2
            "#,
        )
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select checkpoint: {e}"),
        })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state_json: String = row.get("state_json");
        let persisted =
            PersistedCheckpoint::from_json_str(&state_json).map_err(|e| CheckpointerError::Other {
                message: format!("checkpoint decode: {e}"),
            })?;
        let checkpoint = Checkpoint::try_from(persisted).map_err(|e| CheckpointerError::Other {
            message: format!("checkpoint convert: {e}"),
        })?;
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self), err)]
    async fn list_sessions(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id FROM checkpoints
            WHERE expires_at > ?1
            ORDER BY session_id
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("list sessions: {e}"),
        })?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("session_id"))
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE expires_at <= ?1")
            .bind(Utc::now().to_rfc3339())
            .execute(&*self.pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("sweep expired: {e}"),
            })?;
        Ok(result.rows_affected())
    }
}
