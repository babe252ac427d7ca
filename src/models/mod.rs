pub mod audit_log;
pub mod experiment;
pub mod feedback;
pub mod firewall_log;
pub mod firewall_rule;
pub mod project;
pub mod provider;
pub mod result;
pub mod target_config;
pub mod test_case;
pub mod user;

pub use audit_log::AuditLog;
pub use experiment::{Experiment, ExperimentStatus, ExperimentType, SubType, TestingLevel, TurnMode};
pub use feedback::{Correction, Feedback, Vote};
pub use firewall_log::{truncate_preview, FailCategory, FirewallLog};
pub use firewall_rule::{FirewallRule, RuleType};
pub use project::Project;
pub use provider::{ModelProvider, ProviderType};
pub use result::{Result as ExperimentResult, ResultStatus, Severity};
pub use target_config::{AuthType, HttpMethod, TargetConfig};
pub use test_case::{ConversationTurn, TestCase};
pub use user::User;
