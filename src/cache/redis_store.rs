use super::KvStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Production `KvStore`, a thin wrapper over `redis`'s multiplexed async
/// connection manager (enrichment, grounded in the `redis` crate usage in
/// the wider example pack's gateway services).
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn zadd_and_count(&self, key: &str, min_score: f64, member: &str, score: f64) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(min_score)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key);
        let (count,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn zmin_score(&self, key: &str) -> anyhow::Result<Option<f64>> {
        let mut conn = self.conn.clone();
        let result: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
        Ok(result.into_iter().next().map(|(_, score)| score))
    }
}
