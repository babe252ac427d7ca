use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Result {
    pub id: Uuid,
    pub test_case_id: Uuid,
    pub result: ResultStatus,
    pub severity: Option<Severity>,
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
    pub owasp_mapping: Option<String>,
}

impl Result {
    /// Invariant: severity is required iff result == fail (spec §3).
    pub fn validate_shape(&self) -> std::result::Result<(), String> {
        match (self.result, self.severity) {
            (ResultStatus::Fail, None) => Err("fail result requires severity".to_string()),
            (status, Some(_)) if status != ResultStatus::Fail => {
                Err("severity only allowed when result == fail".to_string())
            }
            _ => Ok(()),
        }
    }
}
