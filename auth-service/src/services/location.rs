//! Session location side effect.
//!
//! Geolocation lookup itself lives outside this crate; the session manager
//! only promises to call the recorder once per created or actualized session.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait LocationRecorder: Send + Sync {
    async fn record(&self, session_id: Uuid, ip_address: &str) -> Result<(), anyhow::Error>;
}

/// Recorder that does nothing, for deployments without geolocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocationRecorder;

#[async_trait]
impl LocationRecorder for NoopLocationRecorder {
    async fn record(&self, session_id: Uuid, ip_address: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(session_id = %session_id, ip = %ip_address, "Location lookup skipped");
        Ok(())
    }
}

/// Records every call; can be told to fail.
#[derive(Default)]
pub struct MockLocationRecorder {
    calls: Mutex<Vec<(Uuid, String)>>,
    fail: Mutex<bool>,
}

impl MockLocationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Uuid, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl LocationRecorder for MockLocationRecorder {
    async fn record(&self, session_id: Uuid, ip_address: &str) -> Result<(), anyhow::Error> {
        self.calls
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock recorder mutex poisoned: {}", e))?
            .push((session_id, ip_address.to_string()));

        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(anyhow::anyhow!("geolocation lookup failed"));
        }
        Ok(())
    }
}
