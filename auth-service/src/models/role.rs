//! Role model - permission bitmasks granted per resource.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Permission bits granted on one resource.
    ///
    /// The `*_SELF` bits only ever satisfy self-scoped contexts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        const CREATE      = 0b0000_0001;
        const READ        = 0b0000_0010;
        const UPDATE      = 0b0000_0100;
        const DELETE      = 0b0000_1000;
        const CREATE_SELF = 0b0001_0000;
        const READ_SELF   = 0b0010_0000;
        const UPDATE_SELF = 0b0100_0000;
        const DELETE_SELF = 0b1000_0000;
    }
}

impl Permissions {
    /// Parse a permission name as it appears in the role schema (`read_self`).
    pub fn from_schema_name(name: &str) -> Option<Permissions> {
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return None;
        }
        Self::from_name(&name.to_ascii_uppercase())
    }
}

/// Resources that permissions are granted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Users,
    Sessions,
    Roles,
    Cache,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Sessions => "sessions",
            Resource::Roles => "roles",
            Resource::Cache => "cache",
        }
    }
}

impl std::str::FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Resource::Users),
            "sessions" => Ok(Resource::Sessions),
            "roles" => Ok(Resource::Roles),
            "cache" => Ok(Resource::Cache),
            other => Err(format!("Unknown resource: {}", other)),
        }
    }
}

/// A named role from the deployment schema. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub grants: HashMap<Resource, Permissions>,
}

impl Role {
    pub fn permissions_for(&self, resource: Resource) -> Permissions {
        self.grants.get(&resource).copied().unwrap_or_else(Permissions::empty)
    }
}
