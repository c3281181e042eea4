//! Postgres engine for sessions and pending logins.

use async_trait::async_trait;
use authservice_access::{
    ExpiryReaper, PendingLoginState, Session, SessionStore, StateStore, StoreError,
};
use authservice_core::{Result, SessionId, StateId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

/// Row type for login state queries.
#[derive(FromRow)]
struct LoginStateRow {
    id: String,
    original_url: String,
    nonce: String,
    pkce_verifier: String,
    expires_at: DateTime<Utc>,
}

impl LoginStateRow {
    fn into_state(self) -> PendingLoginState {
        PendingLoginState::from_parts(
            StateId::new(self.id),
            self.original_url,
            self.nonce,
            self.pkce_verifier,
            self.expires_at,
        )
    }
}

fn backend(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Backend {
        operation,
        details: e.to_string(),
    }
}

/// Session and login-state store backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                operation: "migrate",
                details: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    #[instrument(skip_all)]
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let data: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT data
            FROM sessions
            WHERE id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("get session"))?;

        let Some(data) = data else {
            return Ok(None);
        };

        let session: Session =
            serde_json::from_value(data).map_err(|e| StoreError::Corrupt {
                details: e.to_string(),
            })?;
        Ok(Some(session).filter(|s| !s.is_expired()))
    }

    #[instrument(skip_all, fields(user_id = session.user_id()))]
    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let data = serde_json::to_value(session).map_err(|e| StoreError::Corrupt {
            details: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, data, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                data = EXCLUDED.data,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id())
        .bind(data)
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(backend("save session"))?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend("delete session"))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStore {
    #[instrument(skip_all)]
    async fn save_state(&self, state: &PendingLoginState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO login_states (id, original_url, nonce, pkce_verifier, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(state.id().as_str())
        .bind(state.original_url())
        .bind(state.nonce())
        .bind(state.pkce_verifier())
        .bind(state.expires_at())
        .execute(&self.pool)
        .await
        .map_err(backend("save state"))?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn take_state(
        &self,
        id: &StateId,
    ) -> Result<Option<PendingLoginState>, StoreError> {
        // DELETE ... RETURNING hands the row to exactly one caller.
        let row: Option<LoginStateRow> = sqlx::query_as(
            r#"
            DELETE FROM login_states
            WHERE id = $1
            RETURNING id, original_url, nonce, pkce_verifier, expires_at
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("take state"))?;

        Ok(row
            .map(LoginStateRow::into_state)
            .filter(|s| !s.is_expired()))
    }
}

#[async_trait]
impl ExpiryReaper for PgStore {
    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let sessions = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend("reap sessions"))?;

        let states = sqlx::query(
            r#"
            DELETE FROM login_states
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend("reap login states"))?;

        Ok(sessions.rows_affected() + states.rows_affected())
    }
}
