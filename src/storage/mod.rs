pub mod audit_logs;
pub mod experiments;
pub mod feedback;
pub mod firewall_logs;
pub mod firewall_rules;
pub mod projects;
pub mod providers;
pub mod range_utils;
pub mod results;
pub mod simple_storage;
pub mod test_cases;
pub mod users;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use audit_logs::AuditLogStorage;
pub use experiments::ExperimentStorage;
pub use feedback::FeedbackStorage;
pub use firewall_logs::FirewallLogStorage;
pub use firewall_rules::FirewallRuleStorage;
pub use projects::ProjectStorage;
pub use providers::ProviderStorage;
pub use results::ResultStorage;
pub use test_cases::TestCaseStorage;
pub use users::UserStorage;

/// Owns the single redb `Database` handle and every entity's table
/// wrapper, mirroring the teacher's `restflow-storage` `Storage` facade.
#[derive(Debug, Clone)]
pub struct Storage {
    pub users: UserStorage,
    pub projects: ProjectStorage,
    pub providers: ProviderStorage,
    pub experiments: ExperimentStorage,
    pub test_cases: TestCaseStorage,
    pub results: ResultStorage,
    pub feedback: FeedbackStorage,
    pub firewall_rules: FirewallRuleStorage,
    pub firewall_logs: FirewallLogStorage,
    pub audit_logs: AuditLogStorage,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);
        Ok(Self {
            users: UserStorage::new(db.clone())?,
            projects: ProjectStorage::new(db.clone())?,
            providers: ProviderStorage::new(db.clone())?,
            experiments: ExperimentStorage::new(db.clone())?,
            test_cases: TestCaseStorage::new(db.clone())?,
            results: ResultStorage::new(db.clone())?,
            feedback: FeedbackStorage::new(db.clone())?,
            firewall_rules: FirewallRuleStorage::new(db.clone())?,
            firewall_logs: FirewallLogStorage::new(db.clone())?,
            audit_logs: AuditLogStorage::new(db)?,
        })
    }
}
