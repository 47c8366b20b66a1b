//! Session lifecycle: create, actualize (continuity match), revoke.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::authz::{Actor, AuthorizationEngine, Operation};
use super::device::{DeviceConflict, Fingerprint};
use super::error::ServiceError;
use super::jwt::{Claims, TokenPair, TokenPayload, TokenService};
use super::location::LocationRecorder;
use super::store::SessionStore;
use crate::models::{Principal, Session, SessionInfo};
use crate::utils::{bounded, Clock, Timeouts};

/// How a login or refresh resolved against existing sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No usable session existed for this device.
    Created,
    /// An existing session matched and was extended in place.
    Extended,
    /// A session was presented but its fingerprint differed; a new one was created.
    Superseded(DeviceConflict),
}

#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session: Session,
    pub tokens: TokenPair,
    pub outcome: SessionOutcome,
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    authz: Arc<AuthorizationEngine>,
    locations: Arc<dyn LocationRecorder>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        authz: Arc<AuthorizationEngine>,
        locations: Arc<dyn LocationRecorder>,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            sessions,
            tokens,
            authz,
            locations,
            clock,
            timeouts,
        }
    }

    fn issue(&self, principal: &Principal, session: &Session) -> Result<TokenPair, ServiceError> {
        let payload = TokenPayload {
            principal_id: principal.id,
            login: principal.login.clone(),
            session_id: session.id,
            roles: principal.roles.clone(),
            version: principal.version,
        };
        self.tokens.issue_token_pair(&payload).map_err(|e| {
            tracing::error!(error = %e, "Token signing failed");
            ServiceError::Internal(e)
        })
    }

    async fn record_location(&self, session_id: Uuid, ip_address: &str) {
        if let Err(e) = self.locations.record(session_id, ip_address).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to record session location");
        }
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<Session>, ServiceError> {
        bounded(self.timeouts.store, "get_session", self.sessions.get_session(session_id)).await
    }

    /// Start a new session for the device described by `user_agent`.
    ///
    /// Live sessions of the same principal on the same device are revoked
    /// first so at most one stays live per device.
    pub async fn create_session(
        &self,
        principal: &Principal,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<(Session, TokenPair), ServiceError> {
        let fp = Fingerprint::parse(user_agent);
        let now = self.clock.now();

        let replaced = bounded(
            self.timeouts.store,
            "revoke_device_sessions",
            self.sessions.revoke_device_sessions(principal.id, &fp.device_id, now),
        )
        .await?;
        if replaced > 0 {
            tracing::info!(
                user_id = %principal.id,
                device_id = %fp.device_id,
                replaced,
                "Replaced existing sessions on device"
            );
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: principal.id,
            user_agent: user_agent.to_string(),
            ip_address: ip_address.to_string(),
            device_id: fp.device_id,
            device_type: fp.device_type,
            os: fp.os,
            os_version: fp.os_version,
            browser: fp.browser,
            browser_version: fp.browser_version,
            created_at: now,
            last_used_at: now,
            expires_at: now + self.tokens.refresh_ttl(),
            revoked_at: None,
        };

        bounded(self.timeouts.store, "save_session", self.sessions.save_session(&session)).await?;
        self.record_location(session.id, ip_address).await;

        let tokens = self.issue(principal, &session)?;
        tracing::info!(
            user_id = %principal.id,
            session_id = %session.id,
            device_id = %session.device_id,
            "Session created"
        );
        Ok((session, tokens))
    }

    /// Extend `session` in place if `user_agent` fingerprints to the same device.
    ///
    /// `id` and `created_at` are preserved and `expires_at` never moves backwards.
    pub async fn actualize(
        &self,
        session: &Session,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<Session, ServiceError> {
        let fp = Fingerprint::parse(user_agent);
        if let Err(conflict) = fp.check_continuity(session) {
            tracing::warn!(
                session_id = %session.id,
                user_id = %session.user_id,
                conflict = %conflict,
                "Device conflict on session continuity"
            );
            return Err(ServiceError::DeviceConflict(conflict));
        }

        let now = self.clock.now();
        let mut next = session.clone();
        next.user_agent = user_agent.to_string();
        next.ip_address = ip_address.to_string();
        next.os_version = fp.os_version;
        next.browser_version = fp.browser_version;
        next.last_used_at = now;
        next.expires_at = session.expires_at.max(now + self.tokens.refresh_ttl());

        let updated = bounded(self.timeouts.store, "update_session", self.sessions.update_session(&next)).await?;
        if !updated {
            return Err(ServiceError::SessionRevoked);
        }

        self.record_location(next.id, ip_address).await;
        tracing::info!(user_id = %next.user_id, session_id = %next.id, "Session actualized");
        Ok(next)
    }

    /// A live session owned by `principal_id` that continues `session_id`, if any.
    async fn resumable(
        &self,
        principal_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, ServiceError> {
        Ok(self
            .load(session_id)
            .await?
            .filter(|s| s.user_id == principal_id && s.is_live(now)))
    }

    /// Login path. A presented session that still resolves is extended;
    /// otherwise a live session on the same device is reused. A device
    /// conflict falls back to a new session and leaves the old one untouched.
    pub async fn create_or_actualize(
        &self,
        principal: &Principal,
        presented_session: Option<Uuid>,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<SessionGrant, ServiceError> {
        let now = self.clock.now();

        let existing = match presented_session {
            Some(id) => self.resumable(principal.id, id, now).await?,
            None => {
                let device_id = Fingerprint::parse(user_agent).device_id;
                bounded(self.timeouts.store, "list_sessions", self.sessions.list_sessions(principal.id))
                    .await?
                    .into_iter()
                    .find(|s| s.device_id == device_id && s.is_live(now))
            }
        };

        let mut outcome = SessionOutcome::Created;
        if let Some(session) = existing {
            match self.actualize(&session, user_agent, ip_address).await {
                Ok(session) => {
                    let tokens = self.issue(principal, &session)?;
                    return Ok(SessionGrant {
                        session,
                        tokens,
                        outcome: SessionOutcome::Extended,
                    });
                }
                Err(ServiceError::DeviceConflict(conflict)) => {
                    outcome = SessionOutcome::Superseded(conflict);
                }
                // Revoked between lookup and update.
                Err(ServiceError::SessionRevoked) => {}
                Err(e) => return Err(e),
            }
        }

        let (session, tokens) = self.create_session(principal, user_agent, ip_address).await?;
        Ok(SessionGrant {
            session,
            tokens,
            outcome,
        })
    }

    /// Refresh-token exchange. The session must still be live and the
    /// fingerprint must match; a device conflict is returned to the caller.
    pub async fn refresh(
        &self,
        principal: &Principal,
        claims: &Claims,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<SessionGrant, ServiceError> {
        let session = self.ensure_live(claims.session_id(), principal.id).await?;
        let session = self.actualize(&session, user_agent, ip_address).await?;
        let tokens = self.issue(principal, &session)?;
        Ok(SessionGrant {
            session,
            tokens,
            outcome: SessionOutcome::Extended,
        })
    }

    /// Point lookup proving the session behind a token is still usable.
    pub async fn ensure_live(&self, session_id: Uuid, principal_id: Uuid) -> Result<Session, ServiceError> {
        let session = self.load(session_id).await?.ok_or(ServiceError::SessionRevoked)?;

        if session.user_id != principal_id {
            tracing::warn!(
                session_id = %session_id,
                user_id = %principal_id,
                "Token subject does not own session"
            );
            return Err(ServiceError::Unauthenticated("session does not belong to subject".into()));
        }
        if !session.is_live(self.clock.now()) {
            return Err(ServiceError::SessionRevoked);
        }
        Ok(session)
    }

    /// Logout of a single session. Idempotent.
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        let revoked = bounded(
            self.timeouts.store,
            "revoke_session",
            self.sessions.revoke_session(session_id, self.clock.now()),
        )
        .await?;
        if revoked {
            tracing::info!(session_id = %session_id, "Session revoked");
        }
        Ok(revoked)
    }

    /// Revoke one session of any principal, subject to authorization.
    pub async fn revoke_session(&self, actor: &Actor, session_id: Uuid) -> Result<bool, ServiceError> {
        let session = self
            .load(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {}", session_id)))?;

        self.authz
            .authorize_operation(actor, Operation::RevokeSession, session.user_id)?;
        self.revoke(session_id).await
    }

    /// Revoke every session of `target`, subject to authorization.
    pub async fn revoke_all(&self, actor: &Actor, target: Uuid) -> Result<u64, ServiceError> {
        self.authz
            .authorize_operation(actor, Operation::RevokeAllSessions, target)?;

        let revoked = bounded(
            self.timeouts.store,
            "revoke_all_sessions",
            self.sessions.revoke_all_sessions(target, self.clock.now()),
        )
        .await?;
        tracing::info!(user_id = %target, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Live sessions of `target`, subject to authorization.
    pub async fn list_sessions(&self, actor: &Actor, target: Uuid) -> Result<Vec<SessionInfo>, ServiceError> {
        self.authz
            .authorize_operation(actor, Operation::ListSessions, target)?;

        let now = self.clock.now();
        let sessions = bounded(self.timeouts.store, "list_sessions", self.sessions.list_sessions(target)).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.is_live(now))
            .map(|s| SessionInfo::from_session(s, Some(actor.session_id)))
            .collect())
    }
}
