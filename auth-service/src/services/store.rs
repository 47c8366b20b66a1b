//! Persistence contracts and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{AuditEvent, Principal, PrincipalMutation, Session};

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get_principal_by_id(&self, id: Uuid) -> Result<Option<Principal>, ServiceError>;

    async fn get_principal_by_login(&self, login: &str) -> Result<Option<Principal>, ServiceError>;

    /// Fails with `Conflict` if the login is taken.
    async fn insert_principal(&self, principal: &Principal) -> Result<(), ServiceError>;

    /// Apply `mutation` to the principal as last read (`before`), in one transaction:
    ///
    /// - the update only succeeds while the stored version still equals
    ///   `before.version` (`Conflict` otherwise), and bumps it by one
    /// - `audit` is written alongside
    /// - every live session is revoked when `mutation.revokes_sessions()`
    ///
    /// Returns the principal as stored after the commit.
    async fn mutate_principal(
        &self,
        before: &Principal,
        mutation: &PrincipalMutation,
        audit: &AuditEvent,
        at: DateTime<Utc>,
    ) -> Result<Principal, ServiceError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Point lookup by primary key.
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError>;

    async fn save_session(&self, session: &Session) -> Result<(), ServiceError>;

    /// Overwrite the mutable continuity fields of a non-revoked session.
    /// Returns `false` if the session is missing or was revoked meanwhile.
    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError>;

    /// Returns `true` only if this call revoked the session.
    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ServiceError>;

    async fn revoke_all_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, ServiceError>;

    async fn revoke_device_sessions(
        &self,
        user_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Non-revoked sessions, most recently used first.
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError>;
}

#[derive(Default)]
struct MemoryState {
    principals: HashMap<Uuid, Principal>,
    sessions: HashMap<Uuid, Session>,
    audit: Vec<AuditEvent>,
}

impl MemoryState {
    fn login_taken(&self, login: &str, except: Option<Uuid>) -> bool {
        self.principals
            .values()
            .any(|p| p.login == login && Some(p.id) != except)
    }

    fn revoke_where(&mut self, at: DateTime<Utc>, pred: impl Fn(&Session) -> bool) -> u64 {
        let mut revoked = 0;
        for session in self.sessions.values_mut() {
            if session.revoked_at.is_none() && pred(session) {
                session.revoked_at = Some(at);
                revoked += 1;
            }
        }
        revoked
    }
}

/// Mutex-guarded store for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, ServiceError> {
        self.state
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state
            .lock()
            .map(|s| s.audit.clone())
            .unwrap_or_default()
    }

    pub fn all_sessions(&self, user_id: Uuid) -> Vec<Session> {
        self.state
            .lock()
            .map(|s| {
                s.sessions
                    .values()
                    .filter(|x| x.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn get_principal_by_id(&self, id: Uuid) -> Result<Option<Principal>, ServiceError> {
        self.delay().await;
        Ok(self.state()?.principals.get(&id).cloned())
    }

    async fn get_principal_by_login(&self, login: &str) -> Result<Option<Principal>, ServiceError> {
        self.delay().await;
        Ok(self
            .state()?
            .principals
            .values()
            .find(|p| p.login == login)
            .cloned())
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), ServiceError> {
        self.delay().await;
        let mut state = self.state()?;
        if state.login_taken(&principal.login, None) {
            return Err(ServiceError::Conflict(format!(
                "login '{}' is already taken",
                principal.login
            )));
        }
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn mutate_principal(
        &self,
        before: &Principal,
        mutation: &PrincipalMutation,
        audit: &AuditEvent,
        at: DateTime<Utc>,
    ) -> Result<Principal, ServiceError> {
        self.delay().await;
        let mut state = self.state()?;

        let current = state
            .principals
            .get(&before.id)
            .ok_or_else(|| ServiceError::NotFound(format!("principal {}", before.id)))?;
        if current.version != before.version {
            return Err(ServiceError::Conflict(format!(
                "principal {} changed concurrently (expected version {}, found {})",
                before.id, before.version, current.version
            )));
        }

        let next = mutation.apply(current, at);
        if state.login_taken(&next.login, Some(next.id)) {
            return Err(ServiceError::Conflict(format!(
                "login '{}' is already taken",
                next.login
            )));
        }

        if mutation.revokes_sessions() {
            let user_id = next.id;
            state.revoke_where(at, |s| s.user_id == user_id);
        }
        state.audit.push(audit.clone());
        state.principals.insert(next.id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        self.delay().await;
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), ServiceError> {
        self.delay().await;
        let mut state = self.state()?;
        if state.sessions.contains_key(&session.id) {
            return Err(ServiceError::Conflict(format!("session {} already exists", session.id)));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError> {
        self.delay().await;
        let mut state = self.state()?;
        match state.sessions.get_mut(&session.id) {
            Some(stored) if stored.revoked_at.is_none() => {
                stored.user_agent = session.user_agent.clone();
                stored.ip_address = session.ip_address.clone();
                stored.os_version = session.os_version.clone();
                stored.browser_version = session.browser_version.clone();
                stored.last_used_at = session.last_used_at;
                stored.expires_at = session.expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ServiceError> {
        self.delay().await;
        Ok(self.state()?.revoke_where(at, |s| s.id == id) > 0)
    }

    async fn revoke_all_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, ServiceError> {
        self.delay().await;
        Ok(self.state()?.revoke_where(at, |s| s.user_id == user_id))
    }

    async fn revoke_device_sessions(
        &self,
        user_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        self.delay().await;
        Ok(self
            .state()?
            .revoke_where(at, |s| s.user_id == user_id && s.device_id == device_id))
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        self.delay().await;
        let mut sessions: Vec<Session> = self
            .state()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.revoked_at.is_none())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEvent, DeviceType};

    fn session(user_id: Uuid, device_id: &str) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id,
            user_agent: "ua".into(),
            ip_address: "10.0.0.1".into(),
            device_id: device_id.into(),
            device_type: DeviceType::Desktop,
            os: "Windows".into(),
            os_version: "10".into(),
            browser: "Chrome".into(),
            browser_version: "120".into(),
            created_at: now,
            last_used_at: now,
            expires_at: now + chrono::Duration::days(1),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_mutation_is_version_guarded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let alice = Principal::new("alice", "hash", vec!["user".into()], now);
        store.insert_principal(&alice).await.unwrap();

        let mutation = PrincipalMutation::ChangeLogin("alicia".into());
        let audit = AuditEvent::principal_action(alice.id, mutation.audit_event_type(), alice.id, None, now);
        let after = store.mutate_principal(&alice, &mutation, &audit, now).await.unwrap();
        assert_eq!(after.version, alice.version + 1);

        // Replaying against the stale read must not apply twice.
        let stale = store.mutate_principal(&alice, &mutation, &audit, now).await;
        assert!(matches!(stale, Err(ServiceError::Conflict(_))));
        assert_eq!(store.audit_events().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_login_conflicts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_principal(&Principal::new("alice", "h", vec![], now))
            .await
            .unwrap();
        let dup = store.insert_principal(&Principal::new("alice", "h", vec![], now)).await;
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_revocations_are_idempotent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let s = session(user, "WindowsChrome");
        store.save_session(&s).await.unwrap();

        let now = Utc::now();
        assert!(store.revoke_session(s.id, now).await.unwrap());
        assert!(!store.revoke_session(s.id, now).await.unwrap());
        assert_eq!(store.revoke_all_sessions(user, now).await.unwrap(), 0);
        assert!(!store.update_session(&s).await.unwrap());
        assert!(store.list_sessions(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_revocation_is_scoped() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.save_session(&session(user, "WindowsChrome")).await.unwrap();
        store.save_session(&session(user, "Pixel 7")).await.unwrap();

        let revoked = store
            .revoke_device_sessions(user, "WindowsChrome", Utc::now())
            .await
            .unwrap();
        assert_eq!(revoked, 1);

        let live = store.list_sessions(user).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].device_id, "Pixel 7");
    }
}
