use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

mod error;
mod memory_backend;
mod redis_backend;

pub use error::Error;

use crate::configuration::SessionStoreConfig;
pub use memory_backend::MemoryBackend;
pub use redis_backend::RedisBackend;

/// Server-side state of one session.
///
/// At most one principal name is bound per session. A record without a principal name is
/// equivalent to an unauthenticated session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal_name: Option<String>,
    pub antiforgery_token: String,
}

impl SessionRecord {
    pub fn new(principal_name: &str) -> Self {
        Self {
            principal_name: Some(principal_name.to_string()),
            antiforgery_token: new_token(),
        }
    }

    pub fn bound_principal(&self) -> Option<&str> {
        self.principal_name
            .as_deref()
            .filter(|principal| !principal.is_empty())
    }
}

pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Storage for session records, keyed by session identifier.
///
/// Implementations may be remote: every call can be slow or fail, and callers must treat
/// a failure as "no access" rather than as an empty session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the record of a session, `Ok(None)` if unknown or expired.
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, Error>;

    /// Store a record, replacing any previous one, with a time-to-live in seconds.
    async fn save(
        &self,
        session_id: &str,
        record: &SessionRecord,
        expires_in: u64,
    ) -> Result<(), Error>;

    /// Remove every trace of a session. Clearing an unknown session is not an error.
    async fn clear(&self, session_id: &str) -> Result<(), Error>;
}

/// Build the session store backend selected by the configuration.
pub fn build_store(config: &SessionStoreConfig) -> Result<Arc<dyn SessionStore>, Error> {
    match &config.redis {
        Some(redis) => Ok(Arc::new(RedisBackend::new(
            &redis.url,
            redis.key_prefix.clone(),
        )?)),
        None => Ok(Arc::new(MemoryBackend::new())),
    }
}
