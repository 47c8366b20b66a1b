pub mod clock;
pub mod cookie;
pub mod deadline;
pub mod password;

pub use clock::{Clock, MockClock, SystemClock};
pub use cookie::{removal_cookie, session_cookie, SessionCookieConfig};
pub use deadline::{bounded, Timeouts};
pub use password::{hash_password, verify_password, Password, PasswordError, PasswordHashString};
