//! Redis-backed [`CoordinationStore`], enabled with the `redis` feature.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;

use crate::error::AppError;
use crate::store::coordination::CoordinationStore;

#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn_manager: ConnectionManager,
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = Client::open(redis_url)
            .map_err(|err| AppError::Store(format!("failed to create redis client: {err}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|err| {
            AppError::Store(format!("failed to create redis connection manager: {err}"))
        })?;

        Ok(Self { conn_manager })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|err| AppError::Store(format!("redis SET NX failed for {key}: {err}")))?;

        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|err| AppError::Store(format!("redis SET failed for {key}: {err}")))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn_manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| AppError::Store(format!("redis GET failed for {key}: {err}")))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| AppError::Store(format!("redis DEL failed for {key}: {err}")))?;

        Ok(())
    }
}
