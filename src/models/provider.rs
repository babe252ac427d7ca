use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Openai,
    AzureOpenai,
    Groq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProvider {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(skip_serializing)]
    pub encrypted_api_key: String,
    pub endpoint_url: Option<String>,
    pub model: Option<String>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelProvider {
    /// Invariant: azure_openai requires endpoint_url (spec §3).
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.provider_type == ProviderType::AzureOpenai && self.endpoint_url.is_none() {
            return Err("azure_openai provider requires endpoint_url".to_string());
        }
        Ok(())
    }

    pub fn new(
        owner_id: Uuid,
        name: String,
        provider_type: ProviderType,
        encrypted_api_key: String,
        endpoint_url: Option<String>,
        model: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            provider_type,
            encrypted_api_key,
            endpoint_url,
            model,
            is_valid: false,
            created_at: now,
            updated_at: now,
        }
    }
}
