//! Audit event model - written in the same transaction as the mutation it records.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    PrincipalLoginChanged,
    PrincipalPasswordChanged,
    PrincipalRolesChanged,
    PrincipalDeleted,
    PrincipalRestored,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PrincipalLoginChanged => "principal_login_changed",
            AuditEventType::PrincipalPasswordChanged => "principal_password_changed",
            AuditEventType::PrincipalRolesChanged => "principal_roles_changed",
            AuditEventType::PrincipalDeleted => "principal_deleted",
            AuditEventType::PrincipalRestored => "principal_restored",
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub event_type_code: String,
    pub target_id: Uuid,
    pub event_data: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an audit event for an action one principal took on another (or itself).
    pub fn principal_action(
        actor_id: Uuid,
        event_type: AuditEventType,
        target_id: Uuid,
        event_data: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_id: Some(actor_id),
            event_type_code: event_type.as_str().to_string(),
            target_id,
            event_data,
            created_utc: at,
        }
    }
}
