use chrono::Utc;
use redteam_platform::cache::{experiment_cancel_key, RedbKvStore, SharedKvStore};
use redteam_platform::models::{
    AuthType, Experiment, ExperimentStatus, ExperimentType, HttpMethod, SubType, TargetConfig,
    TestingLevel, TurnMode,
};
use redteam_platform::storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn open_storage() -> Storage {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let storage = Storage::open(&path).unwrap();
    std::mem::forget(path);
    storage
}

fn open_kv() -> SharedKvStore {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let db = Arc::new(redb::Database::create(&path).unwrap());
    std::mem::forget(path);
    Arc::new(RedbKvStore::new(db).unwrap())
}

fn direct_experiment(status: ExperimentStatus) -> Experiment {
    Experiment {
        id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        created_by: Uuid::new_v4(),
        provider_id: Uuid::new_v4(),
        name: "cancel-me".to_string(),
        description: None,
        experiment_type: ExperimentType::Adversarial,
        sub_type: SubType::OwaspLlmTop10,
        turn_mode: TurnMode::SingleTurn,
        testing_level: TestingLevel::Basic,
        language: "en".to_string(),
        target_config: TargetConfig {
            endpoint_url: format!("direct://{}", Uuid::new_v4()),
            method: HttpMethod::Post,
            headers: Default::default(),
            payload_template: "{{prompt}}".to_string(),
            response_json_path: "$.response".to_string(),
            auth_type: AuthType::None,
            auth_value: None,
            timeout_seconds: 30,
            thread_endpoint_url: None,
            thread_id_path: None,
            system_prompt: None,
        },
        status,
        progress_total: 0,
        progress_completed: 0,
        analytics: None,
        started_at: None,
        completed_at: None,
        error_message: None,
        created_at: Utc::now(),
    }
}

/// Mirrors the transition a pending cancel takes in `api/experiments.rs`'s
/// `cancel()` handler: no runner is in flight yet, so the status moves
/// straight to its terminal state without touching the cache.
#[tokio::test]
async fn cancelling_a_pending_experiment_transitions_immediately() {
    let storage = open_storage();
    let mut experiment = direct_experiment(ExperimentStatus::Pending);
    storage.experiments.insert(&experiment).unwrap();

    assert!(experiment.status.can_transition_to(ExperimentStatus::Cancelled));
    experiment.status = ExperimentStatus::Cancelled;
    experiment.completed_at = Some(Utc::now());
    storage.experiments.update(&experiment).unwrap();

    let reloaded = storage.experiments.get(experiment.id).unwrap().unwrap();
    assert_eq!(reloaded.status, ExperimentStatus::Cancelled);
    assert!(reloaded.completed_at.is_some());
}

/// Mirrors the running-experiment path: the handler cannot flip status
/// directly (the runner owns that), so it drops a flag the runner's batch
/// loop polls between test cases (see `engine::runner::run_experiment`).
#[tokio::test]
async fn cancelling_a_running_experiment_sets_the_flag_the_runner_polls() {
    let kv = open_kv();
    let experiment = direct_experiment(ExperimentStatus::Running);

    assert!(kv.get(&experiment_cancel_key(experiment.id)).await.unwrap().is_none());

    kv.set_ex(&experiment_cancel_key(experiment.id), "1", Duration::from_secs(3600)).await.unwrap();

    assert!(kv.get(&experiment_cancel_key(experiment.id)).await.unwrap().is_some());
}

#[tokio::test]
async fn completed_experiments_cannot_be_cancelled() {
    let experiment = direct_experiment(ExperimentStatus::Completed);
    assert!(!experiment.status.can_transition_to(ExperimentStatus::Cancelled));
}
