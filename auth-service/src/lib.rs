pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use service_core::error::AppError;

use crate::config::AuthConfig;
use crate::services::{
    AuthService, AuthorizationEngine, Cache, Database, LocationRecorder, NoopLocationRecorder,
    PolicySchema, PrincipalCache, PrincipalStore, RedisService, SessionManager, SessionStore,
    TokenService,
};
use crate::utils::{Clock, SessionCookieConfig, SystemClock, Timeouts};

/// External collaborators the core runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub principals: Arc<dyn PrincipalStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub cache: Arc<dyn Cache>,
    pub locations: Arc<dyn LocationRecorder>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub timeouts: Timeouts,
    pub cache_ttl_seconds: u64,
    pub cookie: SessionCookieConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub tokens: Arc<TokenService>,
    pub authz: Arc<AuthorizationEngine>,
    pub cache: Arc<dyn Cache>,
    pub db: Option<Database>,
}

impl AppState {
    /// Wire the core from already-constructed collaborators.
    pub fn assemble(
        collaborators: Collaborators,
        tokens: TokenService,
        schema: PolicySchema,
        settings: CoreSettings,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let authz = Arc::new(AuthorizationEngine::new(Arc::new(schema)));

        let sessions = SessionManager::new(
            collaborators.sessions,
            tokens.clone(),
            authz.clone(),
            collaborators.locations,
            collaborators.clock.clone(),
            settings.timeouts,
        );

        let cache = PrincipalCache::new(
            collaborators.cache.clone(),
            collaborators.principals.clone(),
            settings.cache_ttl_seconds,
            settings.timeouts,
        );

        let auth_service = AuthService::new(
            collaborators.principals,
            sessions,
            tokens.clone(),
            authz.clone(),
            cache,
            collaborators.clock,
            settings.timeouts,
            settings.cookie,
        );

        Self {
            auth_service,
            tokens,
            authz,
            cache: collaborators.cache,
            db: None,
        }
    }

    /// Load keys and role schema, connect PostgreSQL and Redis, run migrations.
    ///
    /// Any failure here is a startup failure.
    pub async fn bootstrap(config: &AuthConfig) -> Result<Self, AppError> {
        let schema = PolicySchema::load(&config.policy.role_schema_path)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tokens = TokenService::from_config(&config.jwt, clock.clone()).map_err(AppError::ConfigError)?;

        let db = Database::connect(&config.database)
            .await
            .map_err(AppError::DatabaseError)?;
        db.migrate().await.map_err(AppError::DatabaseError)?;

        let redis = RedisService::new(&config.redis)
            .await
            .map_err(AppError::InternalError)?;

        let store = Arc::new(db.clone());
        let collaborators = Collaborators {
            principals: store.clone(),
            sessions: store,
            cache: Arc::new(redis),
            locations: Arc::new(NoopLocationRecorder),
            clock,
        };
        let settings = CoreSettings {
            timeouts: config.timeouts.to_timeouts(),
            cache_ttl_seconds: config.cache.ttl_seconds,
            cookie: config.session_cookie(),
        };

        let mut state = Self::assemble(collaborators, tokens, schema, settings);
        state.db = Some(db);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Auth core initialized"
        );
        Ok(state)
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        if let Some(db) = &self.db {
            db.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                AppError::from(e)
            })?;
        }

        self.cache.health_check().await.map_err(|e| {
            tracing::error!(error = %e, "Cache health check failed");
            AppError::from(e)
        })?;

        Ok(())
    }
}

/// Install tracing for the configured service.
pub fn init_observability(config: &AuthConfig) -> Result<(), AppError> {
    service_core::observability::init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
}
