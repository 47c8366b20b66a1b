//! Role schema loading and credential policy.
//!
//! The role schema is read once at startup. Any unknown resource, permission,
//! context or role name aborts the load; there is no partial schema.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::authz::AuthzContext;
use crate::models::{Permissions, Resource, Role};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read role schema from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Role schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Role schema defines no roles")]
    Empty,
    #[error("Role '{0}' is defined more than once")]
    DuplicateRole(String),
    #[error("Role '{role}' grants on unknown resource '{resource}'")]
    UnknownResource { role: String, resource: String },
    #[error("Role '{role}' grants unknown permission '{permission}'")]
    UnknownPermission { role: String, permission: String },
    #[error("Action gate names unknown context '{0}'")]
    UnknownContext(String),
    #[error("Action gate '{context}' allows unknown role '{role}'")]
    UnknownGateRole { context: String, role: String },
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    roles: Vec<RoleEntry>,
    #[serde(default)]
    action_gates: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    name: String,
    #[serde(default)]
    permissions: HashMap<String, Vec<String>>,
}

/// Role name to per-resource permission bits.
#[derive(Debug, Clone, Default)]
pub struct RolePolicyStore {
    roles: HashMap<String, Role>,
}

impl RolePolicyStore {
    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Union of the bits `roles` hold on `resource`. Unknown role names grant nothing.
    pub fn granted(&self, roles: &[String], resource: Resource) -> Permissions {
        roles
            .iter()
            .filter_map(|name| self.roles.get(name))
            .fold(Permissions::empty(), |acc, role| acc | role.permissions_for(resource))
    }
}

/// Role-name allow-lists evaluated after the bitmask check.
#[derive(Debug, Clone, Default)]
pub struct ActionGatePolicy {
    gates: HashMap<AuthzContext, Vec<String>>,
}

impl ActionGatePolicy {
    pub fn allowed_roles(&self, ctx: AuthzContext) -> Option<&[String]> {
        self.gates.get(&ctx).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicySchema {
    pub roles: RolePolicyStore,
    pub gates: ActionGatePolicy,
}

impl PolicySchema {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let schema = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            roles = schema.roles.roles.len(),
            gates = schema.gates.gates.len(),
            "Role schema loaded"
        );
        Ok(schema)
    }

    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_json::from_str(raw)?;
        if file.roles.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut roles = HashMap::with_capacity(file.roles.len());
        for entry in file.roles {
            let role = parse_role(entry)?;
            if roles.contains_key(&role.name) {
                return Err(SchemaError::DuplicateRole(role.name));
            }
            roles.insert(role.name.clone(), role);
        }

        let mut gates = HashMap::with_capacity(file.action_gates.len());
        for (name, allowed) in file.action_gates {
            let ctx = AuthzContext::from_name(&name)
                .ok_or_else(|| SchemaError::UnknownContext(name.clone()))?;
            if let Some(unknown) = allowed.iter().find(|r| !roles.contains_key(*r)) {
                return Err(SchemaError::UnknownGateRole {
                    context: name,
                    role: unknown.clone(),
                });
            }
            gates.insert(ctx, allowed);
        }

        Ok(Self {
            roles: RolePolicyStore { roles },
            gates: ActionGatePolicy { gates },
        })
    }
}

fn parse_role(entry: RoleEntry) -> Result<Role, SchemaError> {
    let mut grants = HashMap::new();
    for (resource_name, permission_names) in entry.permissions {
        let resource: Resource = resource_name.parse().map_err(|_| SchemaError::UnknownResource {
            role: entry.name.clone(),
            resource: resource_name.clone(),
        })?;

        let mut bits = Permissions::empty();
        for permission in permission_names {
            bits |= Permissions::from_schema_name(&permission).ok_or_else(|| {
                SchemaError::UnknownPermission {
                    role: entry.name.clone(),
                    permission: permission.clone(),
                }
            })?;
        }
        grants.insert(resource, bits);
    }

    Ok(Role {
        name: entry.name,
        grants,
    })
}

/// Errors related to credential validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Login must not be empty")]
    LoginEmpty,
    #[error("Login must not contain whitespace")]
    LoginWhitespace,
    #[error("Password must be at least {min_length} characters (got {actual_length})")]
    PasswordTooShort {
        min_length: usize,
        actual_length: usize,
    },
    #[error("Unknown role: {0}")]
    UnknownRole(String),
    #[error("At least one role is required")]
    NoRoles,
}

pub fn validate_login(login: &str) -> Result<(), PolicyError> {
    if login.is_empty() {
        return Err(PolicyError::LoginEmpty);
    }
    if login.chars().any(char::is_whitespace) {
        return Err(PolicyError::LoginWhitespace);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), PolicyError> {
    let actual_length = password.chars().count();
    if actual_length < MIN_PASSWORD_LENGTH {
        return Err(PolicyError::PasswordTooShort {
            min_length: MIN_PASSWORD_LENGTH,
            actual_length,
        });
    }
    Ok(())
}

pub fn validate_roles(roles: &[String], store: &RolePolicyStore) -> Result<(), PolicyError> {
    if roles.is_empty() {
        return Err(PolicyError::NoRoles);
    }
    match roles.iter().find(|r| !store.contains(r)) {
        Some(unknown) => Err(PolicyError::UnknownRole(unknown.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCHEMA: &str = r#"{
        "roles": [
            { "name": "user", "permissions": { "users": ["read_self", "update_self"] } },
            { "name": "moderator", "permissions": { "users": ["read"], "sessions": ["read"] } },
            { "name": "admin", "permissions": { "cache": ["delete"] } }
        ],
        "action_gates": { "invalidate_cache": ["admin"] }
    }"#;

    #[test]
    fn test_granted_is_union_of_roles() {
        let schema = PolicySchema::from_json(SCHEMA).unwrap();
        let roles = vec!["user".to_string(), "moderator".to_string()];
        let granted = schema.roles.granted(&roles, Resource::Users);
        assert!(granted.contains(Permissions::READ_SELF | Permissions::UPDATE_SELF | Permissions::READ));
        assert!(schema.roles.granted(&roles, Resource::Cache).is_empty());
    }

    #[test]
    fn test_gates_are_keyed_by_context() {
        let schema = PolicySchema::from_json(SCHEMA).unwrap();
        assert_eq!(
            schema.gates.allowed_roles(AuthzContext::InvalidateCache),
            Some(&["admin".to_string()][..])
        );
        assert_eq!(schema.gates.allowed_roles(AuthzContext::Get), None);
    }

    #[test]
    fn test_unknown_names_are_fatal() {
        let bad_permission = r#"{"roles":[{"name":"x","permissions":{"users":["fly"]}}]}"#;
        assert!(matches!(
            PolicySchema::from_json(bad_permission),
            Err(SchemaError::UnknownPermission { .. })
        ));

        let bad_resource = r#"{"roles":[{"name":"x","permissions":{"planets":["read"]}}]}"#;
        assert!(matches!(
            PolicySchema::from_json(bad_resource),
            Err(SchemaError::UnknownResource { .. })
        ));

        let bad_context = r#"{"roles":[{"name":"x"}],"action_gates":{"launch":["x"]}}"#;
        assert!(matches!(
            PolicySchema::from_json(bad_context),
            Err(SchemaError::UnknownContext(_))
        ));

        let bad_gate_role = r#"{"roles":[{"name":"x"}],"action_gates":{"restore":["y"]}}"#;
        assert!(matches!(
            PolicySchema::from_json(bad_gate_role),
            Err(SchemaError::UnknownGateRole { .. })
        ));
    }

    #[test]
    fn test_empty_and_duplicate_schemas_are_rejected() {
        assert!(matches!(PolicySchema::from_json(r#"{"roles":[]}"#), Err(SchemaError::Empty)));
        assert!(matches!(
            PolicySchema::from_json(r#"{"roles":[{"name":"x"},{"name":"x"}]}"#),
            Err(SchemaError::DuplicateRole(_))
        ));
        assert!(matches!(PolicySchema::from_json("not json"), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() -> Result<(), anyhow::Error> {
        let mut file = NamedTempFile::new()?;
        file.write_all(SCHEMA.as_bytes())?;

        let schema = PolicySchema::load(file.path())?;
        assert!(schema.roles.contains("moderator"));

        assert!(matches!(
            PolicySchema::load("/nonexistent/roles.json"),
            Err(SchemaError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_credential_validation() {
        assert!(validate_login("alice").is_ok());
        assert_eq!(validate_login(""), Err(PolicyError::LoginEmpty));
        assert_eq!(validate_login("al ice"), Err(PolicyError::LoginWhitespace));

        assert!(validate_password("longenough").is_ok());
        assert!(matches!(
            validate_password("short"),
            Err(PolicyError::PasswordTooShort { actual_length: 5, .. })
        ));
    }

    #[test]
    fn test_role_validation() {
        let schema = PolicySchema::from_json(SCHEMA).unwrap();
        assert!(validate_roles(&["user".to_string()], &schema.roles).is_ok());
        assert_eq!(validate_roles(&[], &schema.roles), Err(PolicyError::NoRoles));
        assert_eq!(
            validate_roles(&["root".to_string()], &schema.roles),
            Err(PolicyError::UnknownRole("root".to_string()))
        );
    }
}
