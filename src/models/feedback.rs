use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    Pass,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub test_case_id: Uuid,
    pub user_id: Uuid,
    pub vote: Vote,
    pub correction: Option<Correction>,
    pub comment: Option<String>,
}

impl Feedback {
    /// Invariant: correction is rejected when vote == up (spec §3).
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.vote == Vote::Up && self.correction.is_some() {
            return Err("correction is rejected when vote=up".to_string());
        }
        Ok(())
    }
}
