use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCategory {
    OffTopic,
    Violation,
    Restriction,
}

/// Append-only (spec §3). `matched_rule` is nulled, not cascaded, when the
/// referenced rule is deleted (spec §9 "Cyclic relationships").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub matched_rule: Option<String>,
    pub prompt_hash: String,
    pub prompt_preview: String,
    pub agent_prompt_hash: Option<String>,
    pub verdict: bool,
    pub fail_category: Option<FailCategory>,
    pub explanation: Option<String>,
    pub confidence: Option<f64>,
    pub latency_ms: u64,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn truncate_preview(prompt: &str) -> String {
    const MAX: usize = 200;
    if prompt.chars().count() <= MAX {
        prompt.to_string()
    } else {
        prompt.chars().take(MAX).collect()
    }
}
