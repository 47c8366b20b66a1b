pub mod audit_event;
pub mod principal;
pub mod role;
pub mod session;

pub use audit_event::{AuditEvent, AuditEventType};
pub use principal::{normalize_roles, Principal, PrincipalMutation, PrincipalSnapshot};
pub use role::{Permissions, Resource, Role};
pub use session::{DeviceType, Session, SessionInfo};
