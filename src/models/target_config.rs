use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    ApiKey,
    Basic,
    None,
}

/// Embedded in Experiment (spec §3). A `direct://<provider_uuid>` endpoint
/// routes execution through the in-process LLM gateway (C1) instead of HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub endpoint_url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub payload_template: String,
    #[serde(default = "default_response_json_path")]
    pub response_json_path: String,
    pub auth_type: AuthType,
    /// Encrypted when persisted; decrypted by the runner before use.
    pub auth_value: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub thread_endpoint_url: Option<String>,
    pub thread_id_path: Option<String>,
    pub system_prompt: Option<String>,
}

fn default_response_json_path() -> String {
    "$.response".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl TargetConfig {
    pub fn is_direct(&self) -> bool {
        self.endpoint_url.starts_with("direct://")
    }

    pub fn direct_provider_id(&self) -> Option<uuid::Uuid> {
        self.endpoint_url
            .strip_prefix("direct://")
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
    }

    /// Invariants from spec §3: payload_template must contain `{{prompt}}`;
    /// timeout_seconds in [5, 120]; multi_turn requires thread fields.
    pub fn validate(&self, multi_turn: bool) -> Result<(), String> {
        if !self.is_direct() && !self.payload_template.contains("{{prompt}}") {
            return Err("payload_template must contain {{prompt}}".to_string());
        }
        if !(5..=120).contains(&self.timeout_seconds) {
            return Err("timeout_seconds must be in [5, 120]".to_string());
        }
        if multi_turn && (self.thread_endpoint_url.is_none() || self.thread_id_path.is_none()) {
            return Err(
                "multi_turn requires thread_endpoint_url and thread_id_path".to_string(),
            );
        }
        Ok(())
    }
}
