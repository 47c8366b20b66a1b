use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::utils::Clock;

/// PKCS#8 v1 header for a bare Ed25519 seed (RFC 8410).
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// Raw 32-byte Ed25519 verifying key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(&self.0)
    }
}

/// One Ed25519 key pair used for a single token class.
#[derive(Clone)]
pub struct SigningKeyPair {
    encoding_key: EncodingKey,
    public_key: PublicKey,
}

impl SigningKeyPair {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let public_key = PublicKey(SigningKey::from_bytes(seed).verifying_key().to_bytes());

        let mut der = Vec::with_capacity(ED25519_PKCS8_PREFIX.len() + seed.len());
        der.extend_from_slice(&ED25519_PKCS8_PREFIX);
        der.extend_from_slice(seed);

        Self {
            encoding_key: EncodingKey::from_ed_der(&der),
            public_key,
        }
    }

    /// Decode a base64-encoded 32-byte seed.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, anyhow::Error> {
        let bytes = STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|e| anyhow::anyhow!("Signing key is not valid base64: {}", e))?;

        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!("Signing key must be 32 bytes, got {}", bytes.len())
        })?;

        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

/// Which key pair and TTL a token was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Identity carried into a freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub principal_id: Uuid,
    pub login: String,
    pub session_id: Uuid,
    pub roles: Vec<String>,
    pub version: i64,
}

/// Claims shared by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal ID
    pub sub: Uuid,
    /// Login at issuance
    pub iss: String,
    /// Session ID
    pub jti: Uuid,
    pub roles: Vec<String>,
    /// Principal version at issuance
    pub ver: i64,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn principal_id(&self) -> Uuid {
        self.sub
    }

    pub fn session_id(&self) -> Uuid {
        self.jti
    }

    pub fn login(&self) -> &str {
        &self.iss
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Verification failure. Expired tokens prompt a refresh; malformed ones are rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),
    #[error("Token expired")]
    Expired,
}

/// Issues and verifies EdDSA-signed token pairs.
#[derive(Clone)]
pub struct TokenService {
    access: SigningKeyPair,
    refresh: SigningKeyPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
    audience: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        access: SigningKeyPair,
        refresh: SigningKeyPair,
        access_ttl: Duration,
        refresh_ttl: Duration,
        audience: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, anyhow::Error> {
        if access.public_key() == refresh.public_key() {
            return Err(anyhow::anyhow!(
                "Access and refresh tokens must use different key pairs"
            ));
        }
        if audience.is_empty() {
            return Err(anyhow::anyhow!("Token audience must not be empty"));
        }

        let service = Self {
            access,
            refresh,
            access_ttl,
            refresh_ttl,
            audience,
            clock,
        };

        // A key that cannot sign is a configuration error; surface it now
        // rather than on the first login.
        service.check_key(TokenKind::Access)?;
        service.check_key(TokenKind::Refresh)?;

        tracing::info!("Token service initialized with EdDSA keys");
        Ok(service)
    }

    pub fn from_config(config: &JwtConfig, clock: Arc<dyn Clock>) -> Result<Self, anyhow::Error> {
        let access = SigningKeyPair::from_base64(&config.access_signing_key)
            .map_err(|e| anyhow::anyhow!("JWT_ACCESS_SIGNING_KEY: {}", e))?;
        let refresh = SigningKeyPair::from_base64(&config.refresh_signing_key)
            .map_err(|e| anyhow::anyhow!("JWT_REFRESH_SIGNING_KEY: {}", e))?;

        Self::new(
            access,
            refresh,
            Duration::minutes(config.access_token_expiry_minutes),
            Duration::days(config.refresh_token_expiry_days),
            config.audience.clone(),
            clock,
        )
    }

    fn check_key(&self, kind: TokenKind) -> Result<(), anyhow::Error> {
        let payload = TokenPayload {
            principal_id: Uuid::nil(),
            login: "key-check".to_string(),
            session_id: Uuid::nil(),
            roles: Vec::new(),
            version: 0,
        };
        let now = self.clock.now();
        let (token, _) = self.sign(kind, &payload, now)?;
        self.verify(&token, &self.key_pair(kind).public_key())
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("{} key failed self-verification: {}", kind.as_str(), e))
    }

    fn key_pair(&self, kind: TokenKind) -> &SigningKeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    fn sign(
        &self,
        kind: TokenKind,
        payload: &TokenPayload,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        let expires_at = now + self.ttl(kind);
        let claims = Claims {
            sub: payload.principal_id,
            iss: payload.login.clone(),
            jti: payload.session_id,
            roles: payload.roles.clone(),
            ver: payload.version,
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let header = Header::new(Algorithm::EdDSA);
        let token = encode(&header, &claims, &self.key_pair(kind).encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind.as_str(), e))?;

        Ok((token, expires_at))
    }

    /// Sign an access/refresh pair for the same session.
    pub fn issue_token_pair(&self, payload: &TokenPayload) -> Result<TokenPair, anyhow::Error> {
        let now = self.clock.now();
        let (access_token, access_expires_at) = self.sign(TokenKind::Access, payload, now)?;
        let (refresh_token, refresh_expires_at) = self.sign(TokenKind::Refresh, payload, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Check the signature against `key`, then expiry against the injected clock.
    pub fn verify(&self, token: &str, key: &PublicKey) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        validation.set_audience(&self.audience);

        let data = decode::<Claims>(token, &key.decoding_key(), &validation)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        if data.claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.access.public_key())
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, &self.refresh.public_key())
    }

    pub fn access_public_key(&self) -> PublicKey {
        self.access.public_key()
    }

    pub fn refresh_public_key(&self) -> PublicKey {
        self.refresh.public_key()
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}
