use std::sync::Arc;

use axum_extra::extract::cookie::Cookie;
use uuid::Uuid;

use super::authz::{Actor, AuthorizationEngine, AuthzContext, Operation};
use super::cache::{check_version, PrincipalCache};
use super::error::ServiceError;
use super::jwt::{Claims, TokenService};
use super::policy::{validate_login, validate_password, validate_roles};
use super::session::{SessionGrant, SessionManager};
use super::store::PrincipalStore;
use crate::models::{normalize_roles, AuditEvent, Principal, PrincipalMutation, PrincipalSnapshot, SessionInfo};
use crate::utils::{
    bounded, hash_password, removal_cookie, session_cookie, verify_password, Clock, Password,
    PasswordError, PasswordHashString, SessionCookieConfig, Timeouts,
};

const INVALID_CREDENTIALS: &str = "invalid credentials";

/// A verified access token and the caller it identifies.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub claims: Claims,
    pub actor: Actor,
}

#[derive(Clone)]
pub struct AuthService {
    principals: Arc<dyn PrincipalStore>,
    sessions: SessionManager,
    tokens: Arc<TokenService>,
    authz: Arc<AuthorizationEngine>,
    cache: PrincipalCache,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
    cookie: SessionCookieConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        sessions: SessionManager,
        tokens: Arc<TokenService>,
        authz: Arc<AuthorizationEngine>,
        cache: PrincipalCache,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
        cookie: SessionCookieConfig,
    ) -> Self {
        Self {
            principals,
            sessions,
            tokens,
            authz,
            cache,
            clock,
            timeouts,
            cookie,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn cache(&self) -> &PrincipalCache {
        &self.cache
    }

    async fn load_principal(&self, id: Uuid) -> Result<Option<Principal>, ServiceError> {
        bounded(self.timeouts.store, "get_principal_by_id", self.principals.get_principal_by_id(id)).await
    }

    /// Provision a principal. Not gated; callers are trusted provisioning paths.
    pub async fn create_principal(
        &self,
        login: &str,
        password: &str,
        roles: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        validate_login(login).map_err(|e| ServiceError::Validation(e.to_string()))?;
        validate_password(password).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let roles = normalize_roles(roles);
        validate_roles(&roles, &self.authz.schema().roles)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let hash = hash_password(&Password::new(password))
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;

        let principal = Principal::new(login, hash.into_string(), roles, self.clock.now());
        bounded(
            self.timeouts.store,
            "insert_principal",
            self.principals.insert_principal(&principal),
        )
        .await?;

        tracing::info!(user_id = %principal.id, "Principal created");
        Ok(principal)
    }

    /// Password login. A presented refresh token lets the matching session be
    /// extended instead of replaced.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        presented_refresh: Option<&str>,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<SessionGrant, ServiceError> {
        let principal = bounded(
            self.timeouts.store,
            "get_principal_by_login",
            self.principals.get_principal_by_login(login),
        )
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or_else(|| ServiceError::Unauthenticated(INVALID_CREDENTIALS.into()))?;

        let hash = PasswordHashString::new(principal.password_hash.clone());
        match verify_password(&Password::new(password), &hash) {
            Ok(()) => {}
            Err(PasswordError::Mismatch) => {
                tracing::warn!(user_id = %principal.id, "Login failed: bad password");
                return Err(ServiceError::Unauthenticated(INVALID_CREDENTIALS.into()));
            }
            Err(e) => {
                tracing::error!(user_id = %principal.id, error = %e, "Stored password hash is unusable");
                return Err(ServiceError::Unauthenticated(INVALID_CREDENTIALS.into()));
            }
        }

        let presented_session = presented_refresh.and_then(|token| match self.tokens.verify_refresh(token) {
            Ok(claims) if claims.sub == principal.id => Some(claims.jti),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unusable refresh token on login");
                None
            }
        });

        let grant = self
            .sessions
            .create_or_actualize(&principal, presented_session, user_agent, ip_address)
            .await?;

        tracing::info!(
            user_id = %principal.id,
            session_id = %grant.session.id,
            outcome = ?grant.outcome,
            "Login succeeded"
        );
        Ok(grant)
    }

    /// Exchange a refresh token for a new pair carrying current roles and version.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<SessionGrant, ServiceError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let principal = self
            .load_principal(claims.sub)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| ServiceError::Unauthenticated("principal no longer exists".into()))?;

        self.sessions
            .refresh(&principal, &claims, user_agent, ip_address)
            .await
    }

    /// Verify an access token: signature, expiry, version, then session liveness.
    pub async fn authenticate(&self, access_token: &str) -> Result<Authenticated, ServiceError> {
        let claims = self.tokens.verify_access(access_token)?;

        let current = self
            .cache
            .version_by_id(claims.sub)
            .await?
            .ok_or_else(|| ServiceError::Unauthenticated("principal no longer exists".into()))?;
        if let Err(e) = check_version(claims.ver, current) {
            tracing::info!(
                user_id = %claims.sub,
                token_version = claims.ver,
                current_version = current,
                "Token version desynchronized"
            );
            return Err(e);
        }

        self.sessions.ensure_live(claims.jti, claims.sub).await?;

        let actor = Actor {
            principal_id: claims.sub,
            login: claims.iss.clone(),
            roles: claims.roles.clone(),
            session_id: claims.jti,
        };
        Ok(Authenticated { claims, actor })
    }

    /// Revoke the caller's current session.
    pub async fn logout(&self, actor: &Actor) -> Result<bool, ServiceError> {
        self.sessions.revoke(actor.session_id).await
    }

    /// Revoke every session of the caller.
    pub async fn logout_all(&self, actor: &Actor) -> Result<u64, ServiceError> {
        self.sessions.revoke_all(actor, actor.principal_id).await
    }

    /// Authorize, re-read the target from the store, commit the mutation with
    /// its audit event, then purge stale cache keys.
    async fn mutate<F>(
        &self,
        actor: &Actor,
        operation: Operation,
        target: Uuid,
        build: F,
    ) -> Result<Principal, ServiceError>
    where
        F: FnOnce(&Principal) -> Result<PrincipalMutation, ServiceError>,
    {
        let ctx = self.authz.authorize_operation(actor, operation, target)?;
        self.apply_authorized(actor, ctx, target, build).await
    }

    /// Second half of `mutate`, for callers that must authorize before doing
    /// their own store reads.
    async fn apply_authorized<F>(
        &self,
        actor: &Actor,
        ctx: AuthzContext,
        target: Uuid,
        build: F,
    ) -> Result<Principal, ServiceError>
    where
        F: FnOnce(&Principal) -> Result<PrincipalMutation, ServiceError>,
    {
        let before = self
            .load_principal(target)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("principal {}", target)))?;
        let mutation = build(&before)?;

        let now = self.clock.now();
        let audit = AuditEvent::principal_action(
            actor.principal_id,
            mutation.audit_event_type(),
            target,
            mutation.audit_data(&before),
            now,
        );

        let after = bounded(
            self.timeouts.store,
            "mutate_principal",
            self.principals.mutate_principal(&before, &mutation, &audit, now),
        )
        .await?;

        self.cache.invalidate(&before, &after).await;

        tracing::info!(
            actor_id = %actor.principal_id,
            user_id = %target,
            context = ctx.name(),
            version = after.version,
            "Principal mutated"
        );
        Ok(after)
    }

    pub async fn change_login(&self, actor: &Actor, target: Uuid, new_login: &str) -> Result<Principal, ServiceError> {
        validate_login(new_login).map_err(|e| ServiceError::Validation(e.to_string()))?;
        let ctx = self.authz.authorize_operation(actor, Operation::ChangeLogin, target)?;

        let taken = bounded(
            self.timeouts.store,
            "get_principal_by_login",
            self.principals.get_principal_by_login(new_login),
        )
        .await?;

        self.apply_authorized(actor, ctx, target, |before| {
            require_active(before)?;
            if before.login == new_login {
                return Err(ServiceError::Validation("login is unchanged".into()));
            }
            if taken.is_some_and(|p| p.id != before.id) {
                return Err(ServiceError::Conflict(format!("login '{}' is already taken", new_login)));
            }
            Ok(PrincipalMutation::ChangeLogin(new_login.to_string()))
        })
        .await
    }

    pub async fn change_password(
        &self,
        actor: &Actor,
        target: Uuid,
        new_password: &str,
    ) -> Result<Principal, ServiceError> {
        validate_password(new_password).map_err(|e| ServiceError::Validation(e.to_string()))?;

        self.mutate(actor, Operation::ChangePassword, target, |before| {
            require_active(before)?;
            let hash = hash_password(&Password::new(new_password)).map_err(|e| {
                ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
            })?;
            Ok(PrincipalMutation::ChangePassword(hash.into_string()))
        })
        .await
    }

    pub async fn change_roles(
        &self,
        actor: &Actor,
        target: Uuid,
        roles: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        let roles = normalize_roles(roles);
        validate_roles(&roles, &self.authz.schema().roles)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        self.mutate(actor, Operation::ChangeRoles, target, |before| {
            require_active(before)?;
            if before.roles == roles {
                return Err(ServiceError::Validation("roles are unchanged".into()));
            }
            Ok(PrincipalMutation::ChangeRoles(roles))
        })
        .await
    }

    /// Soft-delete. All sessions are revoked in the same transaction.
    pub async fn delete_principal(&self, actor: &Actor, target: Uuid) -> Result<Principal, ServiceError> {
        self.mutate(actor, Operation::DeletePrincipal, target, |before| {
            if before.is_deleted() {
                return Err(ServiceError::Conflict(format!("principal {} is already deleted", target)));
            }
            Ok(PrincipalMutation::SoftDelete)
        })
        .await
    }

    pub async fn restore_principal(&self, actor: &Actor, target: Uuid) -> Result<Principal, ServiceError> {
        self.mutate(actor, Operation::RestorePrincipal, target, |before| {
            if !before.is_deleted() {
                return Err(ServiceError::Conflict(format!("principal {} is not deleted", target)));
            }
            Ok(PrincipalMutation::Restore)
        })
        .await
    }

    /// Read a principal through the cache. Deleted principals are only
    /// returned when `include_deleted` is set.
    pub async fn get_principal(
        &self,
        actor: &Actor,
        target: Uuid,
        include_deleted: bool,
    ) -> Result<PrincipalSnapshot, ServiceError> {
        self.authz
            .authorize_operation(actor, Operation::GetPrincipal, target)?;

        self.cache
            .snapshot_by_id(target, include_deleted)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("principal {}", target)))
    }

    pub async fn list_sessions(&self, actor: &Actor, target: Uuid) -> Result<Vec<SessionInfo>, ServiceError> {
        self.sessions.list_sessions(actor, target).await
    }

    pub async fn revoke_session(&self, actor: &Actor, session_id: Uuid) -> Result<bool, ServiceError> {
        self.sessions.revoke_session(actor, session_id).await
    }

    /// Drop every cached entry derived from `target`.
    pub async fn invalidate_principal_cache(&self, actor: &Actor, target: Uuid) -> Result<u64, ServiceError> {
        self.authz
            .authorize_operation(actor, Operation::InvalidateCache, target)?;

        let principal = self
            .load_principal(target)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("principal {}", target)))?;

        let removed = self.cache.purge_all(&principal).await?;
        tracing::info!(actor_id = %actor.principal_id, user_id = %target, removed, "Principal cache purged");
        Ok(removed)
    }

    /// Refresh-token cookie for a freshly issued grant.
    pub fn session_cookie(&self, grant: &SessionGrant) -> Cookie<'static> {
        session_cookie(&self.cookie, &grant.tokens.refresh_token)
    }

    pub fn logout_cookie(&self) -> Cookie<'static> {
        removal_cookie(&self.cookie)
    }
}

fn require_active(principal: &Principal) -> Result<(), ServiceError> {
    if principal.is_deleted() {
        return Err(ServiceError::NotFound(format!("principal {}", principal.id)));
    }
    Ok(())
}
