use crate::cache::SharedKvStore;
use crate::config::AppConfig;
use crate::security::{JwtIssuer, SecretVault};
use crate::storage::Storage;
use std::sync::Arc;

/// Shared application state, grounded in `restflow-server`'s `AppState`
/// (an `Arc`-of-dependencies clone-per-request struct).
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub kv: SharedKvStore,
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtIssuer>,
    pub vault: Arc<SecretVault>,
    pub http: reqwest::Client,
}
