//! PostgreSQL persistence via sqlx.
//!
//! Queries are checked at runtime so the crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::error::ServiceError;
use super::store::{PrincipalStore, SessionStore};
use crate::config::DatabaseConfig;
use crate::models::{AuditEvent, Principal, PrincipalMutation, Session};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Unique violations become `Conflict`; everything else stays a database error.
fn map_write_error(e: sqlx::Error, what: &str) -> ServiceError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ServiceError::Conflict(format!("{} already exists", what))
        }
        _ => ServiceError::Database(e),
    }
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(max_connections = config.max_connections, "Connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;
        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Apply pending migrations from `auth-service/migrations`.
    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl PrincipalStore for Database {
    async fn get_principal_by_id(&self, id: Uuid) -> Result<Option<Principal>, ServiceError> {
        let principal = sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(principal)
    }

    async fn get_principal_by_login(&self, login: &str) -> Result<Option<Principal>, ServiceError> {
        let principal = sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(principal)
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO principals (id, login, password_hash, roles, deleted_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(principal.id)
        .bind(&principal.login)
        .bind(&principal.password_hash)
        .bind(&principal.roles)
        .bind(principal.deleted_at)
        .bind(principal.version)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "login"))?;
        Ok(())
    }

    async fn mutate_principal(
        &self,
        before: &Principal,
        mutation: &PrincipalMutation,
        audit: &AuditEvent,
        at: DateTime<Utc>,
    ) -> Result<Principal, ServiceError> {
        let next = mutation.apply(before, at);
        let mut tx = self.pool.begin().await?;

        // Version guard: a concurrent writer (or a late retry after a timeout)
        // leaves zero rows to update.
        let updated = sqlx::query_as::<_, Principal>(
            r#"
            UPDATE principals
            SET login = $1, password_hash = $2, roles = $3, deleted_at = $4,
                version = version + 1, updated_at = $5
            WHERE id = $6 AND version = $7
            RETURNING *
            "#,
        )
        .bind(&next.login)
        .bind(&next.password_hash)
        .bind(&next.roles)
        .bind(next.deleted_at)
        .bind(at)
        .bind(before.id)
        .bind(before.version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "login"))?;

        let Some(updated) = updated else {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM principals WHERE id = $1")
                .bind(before.id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some((found,)) => ServiceError::Conflict(format!(
                    "principal {} changed concurrently (expected version {}, found {})",
                    before.id, before.version, found
                )),
                None => ServiceError::NotFound(format!("principal {}", before.id)),
            });
        };

        sqlx::query(
            r#"
            INSERT INTO audit_events (event_id, actor_id, event_type_code, target_id, event_data, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(audit.event_id)
        .bind(audit.actor_id)
        .bind(&audit.event_type_code)
        .bind(audit.target_id)
        .bind(&audit.event_data)
        .bind(audit.created_utc)
        .execute(&mut *tx)
        .await?;

        if mutation.revokes_sessions() {
            let revoked = sqlx::query(
                "UPDATE sessions SET revoked_at = $1 WHERE user_id = $2 AND revoked_at IS NULL",
            )
            .bind(at)
            .bind(before.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tracing::info!(user_id = %before.id, revoked, "Sessions revoked with principal mutation");
        }

        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn save_session(&self, session: &Session) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, user_agent, ip_address, device_id, device_type,
                os, os_version, browser, browser_version,
                created_at, last_used_at, expires_at, revoked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(&session.device_id)
        .bind(session.device_type.as_str())
        .bind(&session.os)
        .bind(&session.os_version)
        .bind(&session.browser)
        .bind(&session.browser_version)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "session"))?;
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET user_agent = $1, ip_address = $2, os_version = $3, browser_version = $4,
                last_used_at = $5, expires_at = $6
            WHERE id = $7 AND revoked_at IS NULL
            "#,
        )
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(&session.os_version)
        .bind(&session.browser_version)
        .bind(session.last_used_at)
        .bind(session.expires_at)
        .bind(session.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ServiceError> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $1 WHERE user_id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_device_sessions(
        &self,
        user_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_at = $1
            WHERE user_id = $2 AND device_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(at)
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = $1 AND revoked_at IS NULL
            ORDER BY last_used_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}
