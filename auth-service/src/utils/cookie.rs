//! Refresh-token session cookie.

use axum_extra::extract::cookie::{Cookie, SameSite};

/// How the refresh-token cookie is issued.
#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    pub name: String,
    /// `false` only in dev deployments served over plain HTTP.
    pub secure: bool,
    pub max_age_seconds: i64,
}

/// Cookie carrying the refresh token.
pub fn session_cookie(config: &SessionCookieConfig, refresh_token: &str) -> Cookie<'static> {
    Cookie::build((config.name.clone(), refresh_token.to_string()))
        .http_only(true)
        .secure(config.secure)
        .path("/")
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(config.max_age_seconds))
        .build()
}

/// Cookie that clears the refresh token on logout.
pub fn removal_cookie(config: &SessionCookieConfig) -> Cookie<'static> {
    Cookie::build((config.name.clone(), String::new()))
        .http_only(true)
        .secure(config.secure)
        .path("/")
        .same_site(SameSite::Strict)
        .max_age(time::Duration::ZERO)
        .build()
}
