use crate::configuration::SessionConfig;
use cookie::time::Duration;
use cookie::{Cookie, SameSite};

/// Cookie carrying the session identifier.
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(i64::try_from(config.ttl).unwrap_or(i64::MAX)))
        .build()
}

/// Removal cookie for the session identifier.
pub fn clear_session_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), ""))
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}
