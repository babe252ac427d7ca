use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    BlockPattern,
    AllowPattern,
    CustomPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub pattern: Option<String>,
    pub policy: Option<String>,
    pub priority: i32,
    pub active: bool,
}

impl FirewallRule {
    /// Invariant: pattern-type rules require `pattern` and forbid `policy`;
    /// custom_policy the reverse (spec §3).
    pub fn validate_shape(&self) -> Result<(), String> {
        match self.rule_type {
            RuleType::BlockPattern | RuleType::AllowPattern => {
                if self.pattern.is_none() {
                    return Err("pattern rules require `pattern`".to_string());
                }
                if self.policy.is_some() {
                    return Err("pattern rules forbid `policy`".to_string());
                }
            }
            RuleType::CustomPolicy => {
                if self.policy.is_none() {
                    return Err("custom_policy rules require `policy`".to_string());
                }
                if self.pattern.is_some() {
                    return Err("custom_policy rules forbid `pattern`".to_string());
                }
            }
        }
        Ok(())
    }
}
