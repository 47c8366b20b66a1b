//! Principal model - the authenticated identity and its versioned record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::AuditEventType;

/// Principal entity as stored in the system of record.
///
/// `version` is bumped by the store on every mutation; tokens embed it so a
/// stale token can be told apart from a current one.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct Principal {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("password_hash", &"<redacted>")
            .field("roles", &self.roles)
            .field("deleted_at", &self.deleted_at)
            .field("version", &self.version)
            .finish()
    }
}

impl Principal {
    /// Create a new principal at version 1.
    pub fn new(
        login: impl Into<String>,
        password_hash: impl Into<String>,
        roles: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            login: login.into(),
            password_hash: password_hash.into(),
            roles: normalize_roles(roles),
            deleted_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Cacheable projection. Never carries the password hash or version.
    pub fn snapshot(&self) -> PrincipalSnapshot {
        PrincipalSnapshot {
            id: self.id,
            login: self.login.clone(),
            roles: self.roles.clone(),
            deleted_at: self.deleted_at,
        }
    }
}

/// Deduplicate roles, keeping first-seen order.
pub fn normalize_roles(roles: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(roles.len());
    for role in roles {
        let role = role.trim().to_string();
        if !role.is_empty() && !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

/// The principal fields served from cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    pub id: Uuid,
    pub login: String,
    pub roles: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PrincipalSnapshot {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single mutation requested of the persistence layer.
#[derive(Clone, PartialEq, Eq)]
pub enum PrincipalMutation {
    ChangeLogin(String),
    /// Carries the already-hashed password.
    ChangePassword(String),
    ChangeRoles(Vec<String>),
    SoftDelete,
    Restore,
}

impl std::fmt::Debug for PrincipalMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalMutation::ChangeLogin(login) => f.debug_tuple("ChangeLogin").field(login).finish(),
            PrincipalMutation::ChangePassword(_) => f.write_str("ChangePassword(<redacted>)"),
            PrincipalMutation::ChangeRoles(roles) => f.debug_tuple("ChangeRoles").field(roles).finish(),
            PrincipalMutation::SoftDelete => f.write_str("SoftDelete"),
            PrincipalMutation::Restore => f.write_str("Restore"),
        }
    }
}

impl PrincipalMutation {
    /// Whether applying this mutation must revoke every session of the principal.
    pub fn revokes_sessions(&self) -> bool {
        matches!(
            self,
            PrincipalMutation::ChangePassword(_)
                | PrincipalMutation::ChangeRoles(_)
                | PrincipalMutation::SoftDelete
        )
    }

    pub fn audit_event_type(&self) -> AuditEventType {
        match self {
            PrincipalMutation::ChangeLogin(_) => AuditEventType::PrincipalLoginChanged,
            PrincipalMutation::ChangePassword(_) => AuditEventType::PrincipalPasswordChanged,
            PrincipalMutation::ChangeRoles(_) => AuditEventType::PrincipalRolesChanged,
            PrincipalMutation::SoftDelete => AuditEventType::PrincipalDeleted,
            PrincipalMutation::Restore => AuditEventType::PrincipalRestored,
        }
    }

    /// Audit payload. Password changes record nothing about the secret.
    pub fn audit_data(&self, before: &Principal) -> Option<serde_json::Value> {
        match self {
            PrincipalMutation::ChangeLogin(login) => Some(serde_json::json!({
                "old_login": before.login,
                "new_login": login,
            })),
            PrincipalMutation::ChangeRoles(roles) => Some(serde_json::json!({
                "old_roles": before.roles,
                "new_roles": roles,
            })),
            PrincipalMutation::ChangePassword(_)
            | PrincipalMutation::SoftDelete
            | PrincipalMutation::Restore => None,
        }
    }

    /// Apply to an in-memory record, bumping the version.
    pub fn apply(&self, principal: &Principal, now: DateTime<Utc>) -> Principal {
        let mut next = principal.clone();
        match self {
            PrincipalMutation::ChangeLogin(login) => next.login = login.clone(),
            PrincipalMutation::ChangePassword(hash) => next.password_hash = hash.clone(),
            PrincipalMutation::ChangeRoles(roles) => next.roles = normalize_roles(roles.clone()),
            PrincipalMutation::SoftDelete => next.deleted_at = Some(now),
            PrincipalMutation::Restore => next.deleted_at = None,
        }
        next.version += 1;
        next.updated_at = now;
        next
    }
}
