pub mod redb_store;
pub mod redis_store;

pub use redb_store::RedbKvStore;
pub use redis_store::RedisKvStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Semantic contract over a Redis-like store (spec §4.12): string keys
/// with TTL, sorted sets for the sliding-window rate limiter, executed
/// as a pipeline so the limiter check is a single round trip.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Atomically: drop members with score < `min_score`, add `member`
    /// with `score`, return the post-trim cardinality. Used for the
    /// firewall's sliding-window rate limiter.
    async fn zadd_and_count(&self, key: &str, min_score: f64, member: &str, score: f64) -> anyhow::Result<u64>;

    /// Smallest score currently in the set, used to compute `Retry-After`.
    async fn zmin_score(&self, key: &str) -> anyhow::Result<Option<f64>>;
}

pub type SharedKvStore = Arc<dyn KvStore>;

pub const FIREWALL_AUTH_TTL: Duration = Duration::from_secs(300);
pub const FIREWALL_SCOPE_TTL: Duration = Duration::from_secs(300);
pub const FIREWALL_RULES_TTL: Duration = Duration::from_secs(300);
pub const RATE_LIMIT_WINDOW_SECS: f64 = 60.0;

pub fn auth_cache_key(hash: &str) -> String {
    format!("firewall:auth:{hash}")
}

pub fn scope_cache_key(project_id: uuid::Uuid) -> String {
    format!("firewall:scope:{project_id}")
}

pub fn rules_cache_key(project_id: uuid::Uuid) -> String {
    format!("firewall:rules:{project_id}")
}

pub fn rate_limit_key(project_id: uuid::Uuid) -> String {
    format!("firewall:rate:{project_id}")
}

pub fn experiment_cancel_key(experiment_id: uuid::Uuid) -> String {
    format!("experiment:{experiment_id}:cancel")
}

pub fn experiment_progress_key(experiment_id: uuid::Uuid) -> String {
    format!("experiment:{experiment_id}:progress")
}
