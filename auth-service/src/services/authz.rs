//! Role-based authorization with self/other scoped contexts and an
//! optional role-name override per context.

use std::sync::Arc;

use uuid::Uuid;

use super::error::ServiceError;
use super::policy::PolicySchema;
use crate::models::{Permissions, Resource};

/// Every action the service gates. Self-scoped variants are selected by the
/// call site when actor and target are the same principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthzContext {
    GetSelf,
    Get,
    ChangeSelfLogin,
    ChangeLogin,
    ChangeSelfPassword,
    ChangePassword,
    DeleteSelf,
    Delete,
    Restore,
    ChangeRoles,
    ListSelfSessions,
    ListSessions,
    RevokeSelfSession,
    RevokeSession,
    RevokeAllSelfSessions,
    RevokeAllSessions,
    InvalidateCache,
}

impl AuthzContext {
    pub const ALL: [AuthzContext; 17] = [
        AuthzContext::GetSelf,
        AuthzContext::Get,
        AuthzContext::ChangeSelfLogin,
        AuthzContext::ChangeLogin,
        AuthzContext::ChangeSelfPassword,
        AuthzContext::ChangePassword,
        AuthzContext::DeleteSelf,
        AuthzContext::Delete,
        AuthzContext::Restore,
        AuthzContext::ChangeRoles,
        AuthzContext::ListSelfSessions,
        AuthzContext::ListSessions,
        AuthzContext::RevokeSelfSession,
        AuthzContext::RevokeSession,
        AuthzContext::RevokeAllSelfSessions,
        AuthzContext::RevokeAllSessions,
        AuthzContext::InvalidateCache,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AuthzContext::GetSelf => "get_self",
            AuthzContext::Get => "get",
            AuthzContext::ChangeSelfLogin => "change_self_login",
            AuthzContext::ChangeLogin => "change_login",
            AuthzContext::ChangeSelfPassword => "change_self_password",
            AuthzContext::ChangePassword => "change_password",
            AuthzContext::DeleteSelf => "delete_self",
            AuthzContext::Delete => "delete",
            AuthzContext::Restore => "restore",
            AuthzContext::ChangeRoles => "change_roles",
            AuthzContext::ListSelfSessions => "list_self_sessions",
            AuthzContext::ListSessions => "list_sessions",
            AuthzContext::RevokeSelfSession => "revoke_self_session",
            AuthzContext::RevokeSession => "revoke_session",
            AuthzContext::RevokeAllSelfSessions => "revoke_all_self_sessions",
            AuthzContext::RevokeAllSessions => "revoke_all_sessions",
            AuthzContext::InvalidateCache => "invalidate_cache",
        }
    }

    pub fn from_name(name: &str) -> Option<AuthzContext> {
        Self::ALL.iter().copied().find(|ctx| ctx.name() == name)
    }

    pub fn entity(&self) -> &'static str {
        "principal"
    }

    pub fn action(&self) -> Operation {
        match self {
            AuthzContext::GetSelf | AuthzContext::Get => Operation::GetPrincipal,
            AuthzContext::ChangeSelfLogin | AuthzContext::ChangeLogin => Operation::ChangeLogin,
            AuthzContext::ChangeSelfPassword | AuthzContext::ChangePassword => {
                Operation::ChangePassword
            }
            AuthzContext::DeleteSelf | AuthzContext::Delete => Operation::DeletePrincipal,
            AuthzContext::Restore => Operation::RestorePrincipal,
            AuthzContext::ChangeRoles => Operation::ChangeRoles,
            AuthzContext::ListSelfSessions | AuthzContext::ListSessions => Operation::ListSessions,
            AuthzContext::RevokeSelfSession | AuthzContext::RevokeSession => {
                Operation::RevokeSession
            }
            AuthzContext::RevokeAllSelfSessions | AuthzContext::RevokeAllSessions => {
                Operation::RevokeAllSessions
            }
            AuthzContext::InvalidateCache => Operation::InvalidateCache,
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            AuthzContext::ChangeRoles => Resource::Roles,
            AuthzContext::ListSelfSessions
            | AuthzContext::ListSessions
            | AuthzContext::RevokeSelfSession
            | AuthzContext::RevokeSession
            | AuthzContext::RevokeAllSelfSessions
            | AuthzContext::RevokeAllSessions => Resource::Sessions,
            AuthzContext::InvalidateCache => Resource::Cache,
            _ => Resource::Users,
        }
    }

    /// Minimum permission bits on `resource()`.
    pub fn required(&self) -> Permissions {
        match self {
            AuthzContext::GetSelf | AuthzContext::ListSelfSessions => Permissions::READ_SELF,
            AuthzContext::Get | AuthzContext::ListSessions => Permissions::READ,
            AuthzContext::ChangeSelfLogin | AuthzContext::ChangeSelfPassword => {
                Permissions::UPDATE_SELF
            }
            AuthzContext::ChangeLogin | AuthzContext::ChangePassword | AuthzContext::ChangeRoles => {
                Permissions::UPDATE
            }
            AuthzContext::DeleteSelf
            | AuthzContext::RevokeSelfSession
            | AuthzContext::RevokeAllSelfSessions => Permissions::DELETE_SELF,
            AuthzContext::Delete
            | AuthzContext::RevokeSession
            | AuthzContext::RevokeAllSessions
            | AuthzContext::InvalidateCache => Permissions::DELETE,
            AuthzContext::Restore => Permissions::UPDATE | Permissions::DELETE,
        }
    }
}

impl std::fmt::Display for AuthzContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation on a principal, before the self/other decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetPrincipal,
    ChangeLogin,
    ChangePassword,
    DeletePrincipal,
    RestorePrincipal,
    ChangeRoles,
    ListSessions,
    RevokeSession,
    RevokeAllSessions,
    InvalidateCache,
}

impl Operation {
    /// Pick the context to authorize. Operations without a self-scoped
    /// variant always use their single context.
    pub fn context(self, is_self: bool) -> AuthzContext {
        match (self, is_self) {
            (Operation::GetPrincipal, true) => AuthzContext::GetSelf,
            (Operation::GetPrincipal, false) => AuthzContext::Get,
            (Operation::ChangeLogin, true) => AuthzContext::ChangeSelfLogin,
            (Operation::ChangeLogin, false) => AuthzContext::ChangeLogin,
            (Operation::ChangePassword, true) => AuthzContext::ChangeSelfPassword,
            (Operation::ChangePassword, false) => AuthzContext::ChangePassword,
            (Operation::DeletePrincipal, true) => AuthzContext::DeleteSelf,
            (Operation::DeletePrincipal, false) => AuthzContext::Delete,
            (Operation::RestorePrincipal, _) => AuthzContext::Restore,
            (Operation::ChangeRoles, _) => AuthzContext::ChangeRoles,
            (Operation::ListSessions, true) => AuthzContext::ListSelfSessions,
            (Operation::ListSessions, false) => AuthzContext::ListSessions,
            (Operation::RevokeSession, true) => AuthzContext::RevokeSelfSession,
            (Operation::RevokeSession, false) => AuthzContext::RevokeSession,
            (Operation::RevokeAllSessions, true) => AuthzContext::RevokeAllSelfSessions,
            (Operation::RevokeAllSessions, false) => AuthzContext::RevokeAllSessions,
            (Operation::InvalidateCache, _) => AuthzContext::InvalidateCache,
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub principal_id: Uuid,
    pub login: String,
    pub roles: Vec<String>,
    pub session_id: Uuid,
}

impl Actor {
    pub fn is_self(&self, target: Uuid) -> bool {
        self.principal_id == target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthzDenial {
    #[error("insufficient permission")]
    InsufficientPermission,
    #[error("denied by override rule")]
    DeniedByOverride,
}

impl From<AuthzDenial> for ServiceError {
    fn from(denial: AuthzDenial) -> Self {
        match denial {
            AuthzDenial::InsufficientPermission => ServiceError::InsufficientPermission,
            AuthzDenial::DeniedByOverride => ServiceError::DeniedByOverride,
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationEngine {
    schema: Arc<PolicySchema>,
}

impl AuthorizationEngine {
    pub fn new(schema: Arc<PolicySchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &PolicySchema {
        &self.schema
    }

    /// Bitmask check first, then the context's override rule if one exists.
    pub fn authorize(&self, ctx: AuthzContext, roles: &[String]) -> Result<(), AuthzDenial> {
        let granted = self.schema.roles.granted(roles, ctx.resource());
        if !granted.contains(ctx.required()) {
            tracing::warn!(
                context = ctx.name(),
                required = ?ctx.required(),
                granted = ?granted,
                "Authorization denied: insufficient permission"
            );
            return Err(AuthzDenial::InsufficientPermission);
        }

        if let Some(allowed) = self.schema.gates.allowed_roles(ctx) {
            if !roles.iter().any(|r| allowed.contains(r)) {
                tracing::warn!(
                    context = ctx.name(),
                    roles = ?roles,
                    "Authorization denied by override rule"
                );
                return Err(AuthzDenial::DeniedByOverride);
            }
        }

        Ok(())
    }

    /// Resolve the self/other context for `actor` acting on `target`, then authorize.
    pub fn authorize_operation(
        &self,
        actor: &Actor,
        operation: Operation,
        target: Uuid,
    ) -> Result<AuthzContext, AuthzDenial> {
        let ctx = operation.context(actor.is_self(target));
        self.authorize(ctx, &actor.roles)?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "roles": [
            { "name": "user", "permissions": {
                "users": ["read_self", "update_self", "delete_self"],
                "sessions": ["read_self", "delete_self"]
            }},
            { "name": "support", "permissions": {
                "users": ["read"], "sessions": ["read", "delete"], "cache": ["delete"]
            }},
            { "name": "admin", "permissions": {
                "users": ["read", "update", "delete"],
                "roles": ["update"],
                "sessions": ["read", "delete"],
                "cache": ["delete"]
            }}
        ],
        "action_gates": { "invalidate_cache": ["admin"] }
    }"#;

    fn engine() -> AuthorizationEngine {
        AuthorizationEngine::new(Arc::new(PolicySchema::from_json(SCHEMA).unwrap()))
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_self_bits_do_not_authorize_other_context() {
        let engine = engine();
        let user = roles(&["user"]);
        assert!(engine.authorize(AuthzContext::ChangeSelfLogin, &user).is_ok());
        assert_eq!(
            engine.authorize(AuthzContext::ChangeLogin, &user),
            Err(AuthzDenial::InsufficientPermission)
        );
    }

    #[test]
    fn test_override_narrows_bitmask_grant() {
        let engine = engine();
        assert_eq!(
            engine.authorize(AuthzContext::InvalidateCache, &roles(&["support"])),
            Err(AuthzDenial::DeniedByOverride)
        );
        assert!(engine.authorize(AuthzContext::InvalidateCache, &roles(&["admin"])).is_ok());
    }

    #[test]
    fn test_bitmask_is_checked_before_override() {
        let engine = engine();
        assert_eq!(
            engine.authorize(AuthzContext::InvalidateCache, &roles(&["user"])),
            Err(AuthzDenial::InsufficientPermission)
        );
    }

    #[test]
    fn test_restore_needs_update_and_delete() {
        let engine = engine();
        assert!(engine.authorize(AuthzContext::Restore, &roles(&["admin"])).is_ok());
        assert_eq!(
            engine.authorize(AuthzContext::Restore, &roles(&["support"])),
            Err(AuthzDenial::InsufficientPermission)
        );
    }

    #[test]
    fn test_unknown_roles_grant_nothing() {
        let engine = engine();
        assert_eq!(
            engine.authorize(AuthzContext::GetSelf, &roles(&["ghost"])),
            Err(AuthzDenial::InsufficientPermission)
        );
        assert_eq!(
            engine.authorize(AuthzContext::GetSelf, &[]),
            Err(AuthzDenial::InsufficientPermission)
        );
    }

    #[test]
    fn test_operation_picks_self_context_for_own_id() {
        let engine = engine();
        let actor = Actor {
            principal_id: Uuid::new_v4(),
            login: "alice".into(),
            roles: roles(&["user"]),
            session_id: Uuid::new_v4(),
        };

        let ctx = engine
            .authorize_operation(&actor, Operation::ListSessions, actor.principal_id)
            .unwrap();
        assert_eq!(ctx, AuthzContext::ListSelfSessions);

        assert_eq!(
            engine.authorize_operation(&actor, Operation::ListSessions, Uuid::new_v4()),
            Err(AuthzDenial::InsufficientPermission)
        );
    }

    #[test]
    fn test_context_names_round_trip() {
        for ctx in AuthzContext::ALL {
            assert_eq!(AuthzContext::from_name(ctx.name()), Some(ctx));
            assert_eq!(ctx.entity(), "principal");
        }
        assert_eq!(AuthzContext::from_name("launch_missiles"), None);
    }
}
