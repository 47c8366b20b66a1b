//! Services layer for auth-service.
//!
//! Token issuance, session continuity, authorization, cache consistency and
//! the persistence/cache adapters they run against.

mod auth;
pub mod authz;
pub mod cache;
mod database;
pub mod device;
pub mod error;
mod jwt;
pub mod location;
pub mod policy;
pub mod redis;
pub mod session;
pub mod store;

pub use auth::{AuthService, Authenticated};
pub use authz::{Actor, AuthorizationEngine, AuthzContext, AuthzDenial, Operation};
pub use cache::{check_version, invalidation_keys, CacheKey, PrincipalCache};
pub use database::Database;
pub use device::{DeviceConflict, Fingerprint};
pub use error::ServiceError;
pub use jwt::{Claims, PublicKey, SigningKeyPair, TokenError, TokenKind, TokenPair, TokenPayload, TokenService};
pub use location::{LocationRecorder, MockLocationRecorder, NoopLocationRecorder};
pub use policy::{ActionGatePolicy, PolicySchema, RolePolicyStore, SchemaError};
pub use redis::{Cache, MockCache, RedisService};
pub use session::{SessionGrant, SessionManager, SessionOutcome};
pub use store::{MemoryStore, PrincipalStore, SessionStore};
