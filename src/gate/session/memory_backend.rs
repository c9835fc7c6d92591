use crate::gate::session::{Error, SessionRecord, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

/// In-process session store. Sessions do not survive a restart and are not shared between
/// instances.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<RwLock<HashMap<String, (SessionRecord, Instant)>>>,
    counter: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        info!("Using in-memory session store");
        MemoryBackend {
            store: Arc::new(RwLock::new(HashMap::new())),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryBackend {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, Error> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);

        if count % 1000 == 0 {
            let mut store = self.store.write().await;
            let now = Instant::now();
            store.retain(|_, (_, expiry)| *expiry > now);

            return Ok(store.get(session_id).map(|(record, _)| record.clone()));
        }

        let store = self.store.read().await;
        Ok(store
            .get(session_id)
            .filter(|(_, expiry)| *expiry > Instant::now())
            .map(|(record, _)| record.clone()))
    }

    async fn save(
        &self,
        session_id: &str,
        record: &SessionRecord,
        expires_in: u64,
    ) -> Result<(), Error> {
        let expiry = Instant::now()
            .checked_add(Duration::from_secs(expires_in))
            .ok_or_else(|| {
                Error::StorageError(format!("Session expiry out of range: {expires_in}s"))
            })?;

        let count = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut store = self.store.write().await;

        if count % 1000 == 0 {
            let now = Instant::now();
            store.retain(|_, (_, expiry)| *expiry > now);
        }

        store.insert(session_id.to_string(), (record.clone(), expiry));
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), Error> {
        self.store.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(principal: &str) -> SessionRecord {
        SessionRecord {
            principal_name: Some(principal.to_string()),
            antiforgery_token: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryBackend::new();

        assert_eq!(store.load("session").await, Ok(None));

        store.save("session", &record("a@b.edu"), 1).await.unwrap();
        assert_eq!(store.load("session").await, Ok(Some(record("a@b.edu"))));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(store.load("session").await, Ok(None));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryBackend::new();

        store.save("session", &record("a@b.edu"), 60).await.unwrap();
        store.save("session", &record("c@d.edu"), 60).await.unwrap();

        assert_eq!(store.load("session").await, Ok(Some(record("c@d.edu"))));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryBackend::new();

        store.save("session", &record("a@b.edu"), 60).await.unwrap();
        store.save("other", &record("c@d.edu"), 60).await.unwrap();

        store.clear("session").await.unwrap();
        assert_eq!(store.load("session").await, Ok(None));
        assert_eq!(store.load("other").await, Ok(Some(record("c@d.edu"))));

        assert_eq!(store.clear("unknown").await, Ok(()));
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_is_an_error() {
        let store = MemoryBackend::new();

        let result = store.save("session", &record("a@b.edu"), u64::MAX).await;
        assert!(matches!(result, Err(Error::StorageError(_))));
        assert_eq!(store.load("session").await, Ok(None));
    }

    #[tokio::test]
    async fn test_cleanup_on_counter() {
        let store = MemoryBackend::new();

        for i in 0..500 {
            store
                .save(&format!("short_{i}"), &record("a@b.edu"), 1)
                .await
                .unwrap();
        }

        for i in 0..5 {
            store
                .save(&format!("long_{i}"), &record("a@b.edu"), 100)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;

        for i in 0..495 {
            let _ = store.load(&format!("nonexistent_{i}")).await;
        }

        assert_eq!(store.load("long_0").await, Ok(Some(record("a@b.edu"))));
        assert_eq!(store.load("short_0").await, Ok(None));
        assert!(store.store.read().await.len() <= 6);
    }
}
