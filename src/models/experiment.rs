use super::target_config::TargetConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    Adversarial,
    Behavioural,
}

/// Sub-types permitted per experiment_type (spec §3 invariant a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubType {
    OwaspLlmTop10,
    OwaspAgentic,
    Adaptive,
    ScopeValidation,
    UserInteraction,
    Functional,
}

impl SubType {
    pub fn allowed_for(self, experiment_type: ExperimentType) -> bool {
        use ExperimentType::*;
        use SubType::*;
        matches!(
            (experiment_type, self),
            (Adversarial, OwaspLlmTop10)
                | (Adversarial, OwaspAgentic)
                | (Adversarial, Adaptive)
                | (Behavioural, ScopeValidation)
                | (Behavioural, UserInteraction)
                | (Behavioural, Functional)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    SingleTurn,
    MultiTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestingLevel {
    Basic,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExperimentStatus {
    /// Status DAG is monotonic: pending -> running -> terminal (spec §3, §8).
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExperimentStatus::Completed | ExperimentStatus::Failed | ExperimentStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub created_by: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub experiment_type: ExperimentType,
    pub sub_type: SubType,
    pub turn_mode: TurnMode,
    pub testing_level: TestingLevel,
    pub language: String,
    pub target_config: TargetConfig,
    pub status: ExperimentStatus,
    pub progress_total: u32,
    pub progress_completed: u32,
    pub analytics: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    /// Invariants (b) and (c) from spec §3.
    pub fn validate_shape(&self) -> Result<(), String> {
        if !self.sub_type.allowed_for(self.experiment_type) {
            return Err(format!(
                "sub_type {:?} not permitted for experiment_type {:?}",
                self.sub_type, self.experiment_type
            ));
        }
        if self.sub_type == SubType::Adaptive && self.turn_mode != TurnMode::MultiTurn {
            return Err("sub_type adaptive implies multi_turn".to_string());
        }
        self.target_config
            .validate(self.turn_mode == TurnMode::MultiTurn)?;
        Ok(())
    }

    pub fn progress_percentage(&self) -> Option<f64> {
        if self.progress_total == 0 {
            return None;
        }
        Some((self.progress_completed as f64 / self.progress_total as f64) * 100.0)
    }
}
