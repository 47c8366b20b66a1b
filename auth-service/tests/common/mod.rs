//! Shared harness for auth-service integration tests.
//!
//! Wires the core against in-memory collaborators and a manually driven clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use auth_service::{
    models::Principal,
    services::{
        Actor, AuthService, MemoryStore, MockCache, MockLocationRecorder, PolicySchema,
        PrincipalStore, SessionGrant, SigningKeyPair, TokenService,
    },
    utils::{hash_password, Clock, MockClock, Password, SessionCookieConfig, Timeouts},
    AppState, Collaborators, CoreSettings,
};
use chrono::{TimeZone, Utc};

pub const ACCESS_SEED: [u8; 32] = [7u8; 32];
pub const REFRESH_SEED: [u8; 32] = [9u8; 32];
pub const AUDIENCE: &str = "auth-service";
pub const PASSWORD: &str = "correct-horse-battery";
pub const IP: &str = "203.0.113.10";

pub const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const CHROME_WINDOWS_UPDATED: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
pub const FIREFOX_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";
pub const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const PIXEL_7: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36";
pub const PIXEL_8: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36";

pub const ROLE_SCHEMA: &str = r#"{
    "roles": [
        { "name": "user", "permissions": {
            "users": ["read_self", "update_self", "delete_self"],
            "sessions": ["read_self", "delete_self"]
        }},
        { "name": "moderator", "permissions": {
            "users": ["read"],
            "sessions": ["read", "delete"]
        }},
        { "name": "support", "permissions": {
            "users": ["read"],
            "cache": ["delete"]
        }},
        { "name": "admin", "permissions": {
            "users": ["create", "read", "update", "delete", "read_self", "update_self", "delete_self"],
            "roles": ["read", "update"],
            "sessions": ["read", "delete", "read_self", "delete_self"],
            "cache": ["delete"]
        }}
    ],
    "action_gates": {
        "invalidate_cache": ["admin"]
    }
}"#;

pub fn schema() -> PolicySchema {
    PolicySchema::from_json(ROLE_SCHEMA).expect("Failed to parse test role schema")
}

pub fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Core wired against in-memory collaborators.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MockCache>,
    pub clock: Arc<MockClock>,
    pub locations: Arc<MockLocationRecorder>,
    pub timeouts: Timeouts,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_timeouts(Timeouts::from_millis(200, 200)).await
    }

    pub async fn spawn_with_timeouts(timeouts: Timeouts) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MockCache::new());
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let locations = Arc::new(MockLocationRecorder::new());

        let tokens = TokenService::new(
            SigningKeyPair::from_seed(&ACCESS_SEED),
            SigningKeyPair::from_seed(&REFRESH_SEED),
            chrono::Duration::minutes(15),
            chrono::Duration::days(30),
            vec![AUDIENCE.to_string()],
            clock.clone(),
        )
        .expect("Failed to create token service");

        let collaborators = Collaborators {
            principals: store.clone(),
            sessions: store.clone(),
            cache: cache.clone(),
            locations: locations.clone(),
            clock: clock.clone(),
        };
        let settings = CoreSettings {
            timeouts,
            cache_ttl_seconds: 300,
            cookie: SessionCookieConfig {
                name: "refresh_token".to_string(),
                secure: true,
                max_age_seconds: 30 * 24 * 3600,
            },
        };

        let state = AppState::assemble(collaborators, tokens, schema(), settings);

        TestApp {
            state,
            store,
            cache,
            clock,
            locations,
            timeouts,
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.state.auth_service
    }

    pub fn tokens(&self) -> &TokenService {
        &self.state.tokens
    }

    /// Provision through the service.
    pub async fn create_principal(&self, login: &str, role_names: &[&str]) -> Principal {
        self.auth()
            .create_principal(login, PASSWORD, roles(role_names))
            .await
            .expect("Failed to create principal")
    }

    /// Insert directly into the store at an arbitrary version.
    pub async fn seed_principal(&self, login: &str, role_names: &[&str], version: i64) -> Principal {
        let hash = hash_password(&Password::new(PASSWORD.to_string()))
            .expect("Failed to hash password");
        let mut principal = Principal::new(login, hash.into_string(), roles(role_names), Utc::now());
        principal.version = version;
        self.store
            .insert_principal(&principal)
            .await
            .expect("Failed to seed principal");
        principal
    }

    pub async fn login(&self, login: &str, user_agent: &str) -> SessionGrant {
        self.auth()
            .login(login, PASSWORD, None, user_agent, IP)
            .await
            .expect("Login failed")
    }

    pub async fn login_with(&self, login: &str, presented: &SessionGrant, user_agent: &str) -> SessionGrant {
        self.auth()
            .login(login, PASSWORD, Some(&presented.tokens.refresh_token), user_agent, IP)
            .await
            .expect("Login failed")
    }

    pub async fn actor(&self, grant: &SessionGrant) -> Actor {
        self.auth()
            .authenticate(&grant.tokens.access_token)
            .await
            .expect("Authentication failed")
            .actor
    }

    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }

    pub fn slow_store(&self, latency: Duration) {
        self.store.set_latency(Some(latency));
    }
}
