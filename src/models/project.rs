use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub business_scope: String,
    pub allowed_intents: Vec<String>,
    pub restricted_intents: Vec<String>,
    pub analyzed_scope: Option<Value>,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        owner_id: Uuid,
        name: String,
        business_scope: String,
        allowed_intents: Vec<String>,
        restricted_intents: Vec<String>,
        api_key_hash: String,
        api_key_prefix: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            business_scope,
            allowed_intents,
            restricted_intents,
            analyzed_scope: None,
            api_key_hash,
            api_key_prefix,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
