use std::env;

/// Environment-driven application configuration (spec §6 "Configuration").
/// Grounded in `restflow-server/src/config.rs`'s `ServerConfig::load()`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: String,
    pub api_v1_prefix: String,
    pub cors_origins: Vec<String>,

    pub host: String,
    pub port: u16,
    pub workers: usize,

    pub db_path: String,
    pub kv_backend: KvBackend,
    pub redis_url: Option<String>,

    pub secret_key: String,
    pub encryption_key: String,
    pub jwt_access_token_expire_minutes: i64,
    pub jwt_refresh_token_expire_days: i64,

    pub firewall_rate_limit_per_minute: u64,
    pub api_rate_limit_per_minute: u64,

    pub llm_judge_model: String,
    pub llm_judge_temperature: f64,
    pub llm_judge_max_tokens: u64,
    pub llm_request_timeout_secs: u64,

    pub experiment_batch_size: usize,
    pub experiment_max_retries: u32,
    pub experiment_retry_delay_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackend {
    Redb,
    Redis,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let kv_backend = match env_or("KV_BACKEND", "redb").as_str() {
            "redis" => KvBackend::Redis,
            _ => KvBackend::Redb,
        };

        Ok(Self {
            app_env: env_or("APP_ENV", "development"),
            api_v1_prefix: env_or("API_V1_PREFIX", "/api/v1"),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:5173")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000),
            workers: env_parse("WORKERS", 1),

            db_path: env_or("DATABASE_PATH", "redteam.db"),
            kv_backend,
            redis_url: env::var("REDIS_URL").ok(),

            secret_key: env_or("SECRET_KEY", "changeme-generate-a-64-char-random-string"),
            encryption_key: env_or("ENCRYPTION_KEY", ""),
            jwt_access_token_expire_minutes: env_parse("JWT_ACCESS_TOKEN_EXPIRE_MINUTES", 15),
            jwt_refresh_token_expire_days: env_parse("JWT_REFRESH_TOKEN_EXPIRE_DAYS", 7),

            firewall_rate_limit_per_minute: env_parse("FIREWALL_RATE_LIMIT_PER_MINUTE", 100),
            api_rate_limit_per_minute: env_parse("API_RATE_LIMIT_PER_MINUTE", 60),

            llm_judge_model: env_or("LLM_JUDGE_MODEL", "gpt-4o"),
            llm_judge_temperature: env_parse("LLM_JUDGE_TEMPERATURE", 0.0),
            llm_judge_max_tokens: env_parse("LLM_JUDGE_MAX_TOKENS", 1024),
            llm_request_timeout_secs: env_parse("LLM_REQUEST_TIMEOUT", 30),

            experiment_batch_size: env_parse("EXPERIMENT_BATCH_SIZE", 5),
            experiment_max_retries: env_parse("EXPERIMENT_MAX_RETRIES", 3),
            experiment_retry_delay_secs: env_parse("EXPERIMENT_RETRY_DELAY", 5),
        })
    }
}
