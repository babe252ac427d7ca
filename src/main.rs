use axum::http::{header, Method};
use redteam_platform::api;
use redteam_platform::api::state::AppState;
use redteam_platform::cache::{RedbKvStore, RedisKvStore, SharedKvStore};
use redteam_platform::config::{AppConfig, KvBackend};
use redteam_platform::security::{JwtIssuer, SecretVault};
use redteam_platform::storage::Storage;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

fn derive_encryption_key(config: &AppConfig) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(config.encryption_key.as_bytes());
    hasher.finalize().into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,redteam_platform=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting red-team platform");

    let config = Arc::new(AppConfig::load()?);
    let storage = Storage::open(&config.db_path)?;

    let kv: SharedKvStore = match config.kv_backend {
        KvBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("KV_BACKEND=redis requires REDIS_URL"))?;
            Arc::new(RedisKvStore::connect(url).await?)
        }
        KvBackend::Redb => {
            let cache_path = format!("{}.cache", config.db_path);
            let db = Arc::new(redb::Database::create(cache_path)?);
            Arc::new(RedbKvStore::new(db)?)
        }
    };

    let jwt = Arc::new(JwtIssuer::new(
        config.secret_key.clone(),
        config.jwt_access_token_expire_minutes,
        config.jwt_refresh_token_expire_days,
    ));
    let vault = Arc::new(SecretVault::new(&derive_encryption_key(&config))?);
    let http = reqwest::Client::builder().timeout(std::time::Duration::from_secs(config.llm_request_timeout_secs)).build()?;

    let state = AppState { storage, kv, config: config.clone(), jwt, vault, http };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = axum::Router::new()
        .route("/health", axum::routing::get(health))
        .nest(&config.api_v1_prefix, api::router())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind to {}: {}", addr, err))?;

    tracing::info!("Red-team platform listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to start server: {}", err))?;

    Ok(())
}

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health { status: "redteam-platform is working!".to_string() })
}
