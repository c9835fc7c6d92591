use crate::gate::session::{Error, SessionRecord, SessionStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;

/// Session store shared between gate instances through a Redis-compatible server.
#[derive(Debug)]
pub struct RedisBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisBackend {
    pub fn new(redis_url: &str, key_prefix: String) -> Result<Self, Error> {
        info!("Using Redis session store");
        let client = redis::Client::open(redis_url)?;
        Ok(RedisBackend { client, key_prefix })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}session:{session_id}", self.key_prefix)
    }
}

#[async_trait]
impl SessionStore for RedisBackend {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, Error> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.key(session_id)).await?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        session_id: &str,
        record: &SessionRecord,
        expires_in: u64,
    ) -> Result<(), Error> {
        let value = serde_json::to_string(record)?;
        let mut conn = self.get_connection().await?;
        Ok(conn.set_ex(self.key(session_id), value, expires_in).await?)
    }

    async fn clear(&self, session_id: &str) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        let _: usize = conn.del(self.key(session_id)).await?;
        Ok(())
    }
}
