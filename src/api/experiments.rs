use crate::api::auth::AuthUser;
use crate::api::state::AppState;
use crate::api_response::ApiResponse;
use crate::cache::{experiment_cancel_key, experiment_progress_key};
use crate::engine::scorer::Analytics;
use crate::error::{AppError, AppResult};
use crate::models::{
    Correction, Experiment, ExperimentStatus, ExperimentType, Feedback, ExperimentResult, SubType,
    TargetConfig, TestCase, TestingLevel, TurnMode, Vote,
};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateExperimentRequest {
    pub provider_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub experiment_type: ExperimentType,
    pub sub_type: SubType,
    pub turn_mode: TurnMode,
    pub testing_level: TestingLevel,
    #[serde(default = "default_language")]
    pub language: String,
    pub target_config: TargetConfig,
}

fn default_language() -> String {
    "en".to_string()
}

async fn project_scope(state: &AppState, owner_id: Uuid, project_id: Uuid) -> AppResult<()> {
    let project = state.storage.projects.get(project_id)?.ok_or(AppError::NotFound("project".to_string()))?;
    if project.owner_id != owner_id {
        return Err(AppError::NotFound("project".to_string()));
    }
    Ok(())
}

async fn experiment_in_project(state: &AppState, project_id: Uuid, experiment_id: Uuid) -> AppResult<Experiment> {
    let experiment = state.storage.experiments.get(experiment_id)?.ok_or(AppError::NotFound("experiment".to_string()))?;
    if experiment.project_id != project_id {
        return Err(AppError::NotFound("experiment".to_string()));
    }
    Ok(experiment)
}

async fn create(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateExperimentRequest>,
) -> AppResult<Json<ApiResponse<Experiment>>> {
    project_scope(&state, owner_id, project_id).await?;

    let experiment = Experiment {
        id: Uuid::new_v4(),
        project_id,
        created_by: owner_id,
        provider_id: req.provider_id,
        name: req.name,
        description: req.description,
        experiment_type: req.experiment_type,
        sub_type: req.sub_type,
        turn_mode: req.turn_mode,
        testing_level: req.testing_level,
        language: req.language,
        target_config: req.target_config,
        status: ExperimentStatus::Pending,
        progress_total: 0,
        progress_completed: 0,
        analytics: None,
        started_at: None,
        completed_at: None,
        error_message: None,
        created_at: chrono::Utc::now(),
    };
    experiment.validate_shape().map_err(AppError::InvalidInput)?;
    state.storage.experiments.insert(&experiment)?;

    let storage = state.storage.clone();
    let kv = state.kv.clone();
    let vault = state.vault.clone();
    let http = state.http.clone();
    let config = state.config.clone();
    let experiment_id = experiment.id;
    tokio::spawn(async move {
        if let Err(err) = crate::engine::runner::run_experiment(&storage, &kv, &vault, &http, &config, experiment_id).await {
            tracing::warn!(experiment_id = %experiment_id, error = %err, "experiment run failed");
        }
    });

    Ok(ApiResponse::ok(experiment))
}

async fn list(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Experiment>>>> {
    project_scope(&state, owner_id, project_id).await?;
    Ok(ApiResponse::ok(state.storage.experiments.list_by_project(project_id)?))
}

async fn get_one(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, experiment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<Experiment>>> {
    project_scope(&state, owner_id, project_id).await?;
    Ok(ApiResponse::ok(experiment_in_project(&state, project_id, experiment_id).await?))
}

#[derive(Debug, Serialize)]
struct ExperimentProgress {
    total: Option<u32>,
    completed: u32,
    percentage: Option<f64>,
}

/// `GET /projects/{pid}/experiments/{eid}/status` — reads live progress
/// from KV during `running`, falling back to the store otherwise
/// (spec §6 "Experiment progress").
async fn status(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, experiment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<ExperimentProgress>>> {
    project_scope(&state, owner_id, project_id).await?;
    let experiment = experiment_in_project(&state, project_id, experiment_id).await?;

    if experiment.status == ExperimentStatus::Running {
        if let Ok(Some(raw)) = state.kv.get(&experiment_progress_key(experiment_id)).await {
            if let Some((completed, total)) = raw.split_once('/') {
                if let (Ok(completed), Ok(total)) = (completed.parse::<u32>(), total.parse::<u32>()) {
                    let percentage = (total > 0).then(|| completed as f64 / total as f64 * 100.0);
                    return Ok(ApiResponse::ok(ExperimentProgress { total: Some(total), completed, percentage }));
                }
            }
        }
    }

    Ok(ApiResponse::ok(ExperimentProgress {
        total: (experiment.progress_total > 0).then_some(experiment.progress_total),
        completed: experiment.progress_completed,
        percentage: experiment.progress_percentage(),
    }))
}

/// Sets the KV cancel flag; pending experiments transition immediately,
/// running ones are picked up by the runner's next batch boundary
/// (spec §6).
async fn cancel(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, experiment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<Experiment>>> {
    project_scope(&state, owner_id, project_id).await?;
    let mut experiment = experiment_in_project(&state, project_id, experiment_id).await?;

    if experiment.status == ExperimentStatus::Pending {
        experiment.status = ExperimentStatus::Cancelled;
        experiment.completed_at = Some(chrono::Utc::now());
        state.storage.experiments.update(&experiment)?;
    } else if experiment.status == ExperimentStatus::Running {
        state
            .kv
            .set_ex(&experiment_cancel_key(experiment_id), "1", Duration::from_secs(3600))
            .await
            .ok();
    } else {
        return Err(AppError::Conflict(format!("cannot cancel experiment in status {:?}", experiment.status)));
    }

    Ok(ApiResponse::ok(experiment))
}

async fn delete_experiment(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, experiment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    project_scope(&state, owner_id, project_id).await?;
    let experiment = experiment_in_project(&state, project_id, experiment_id).await?;
    if experiment.status == ExperimentStatus::Running {
        return Err(AppError::Conflict("cannot delete a running experiment".to_string()));
    }
    state.storage.experiments.delete(experiment_id)?;
    Ok(ApiResponse::ok(serde_json::json!({})))
}

async fn dashboard(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Analytics>>> {
    let experiment = state.storage.experiments.get(experiment_id)?.ok_or(AppError::NotFound("experiment".to_string()))?;
    project_scope(&state, owner_id, experiment.project_id).await?;
    let analytics: Analytics = experiment
        .analytics
        .ok_or_else(|| AppError::NotFound("analytics not yet available".to_string()))
        .and_then(|value| serde_json::from_value(value).map_err(|err| AppError::Internal(err.to_string())))?;
    Ok(ApiResponse::ok(analytics))
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    s: String,
    id: Uuid,
}

fn encode_cursor(sort_value: &str, id: Uuid) -> String {
    let payload = serde_json::json!({"s": sort_value, "id": id});
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string())
}

fn decode_cursor(raw: &str) -> Option<Cursor> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    cursor: Option<String>,
    #[serde(default = "default_page_size")]
    limit: usize,
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct TestCaseEntry {
    #[serde(flatten)]
    test_case: TestCase,
    result: Option<ExperimentResult>,
}

#[derive(Debug, Serialize)]
struct LogsPage {
    items: Vec<TestCaseEntry>,
    next_cursor: Option<String>,
}

/// Cursor-paginated over `sequence_order` ascending, the only sort column
/// exercised by the firewall/runner's own append order (spec §6).
async fn logs(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(experiment_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<ApiResponse<LogsPage>>> {
    let experiment = state.storage.experiments.get(experiment_id)?.ok_or(AppError::NotFound("experiment".to_string()))?;
    project_scope(&state, owner_id, experiment.project_id).await?;

    let mut cases = state.storage.test_cases.list_by_experiment(experiment_id)?;
    cases.sort_by_key(|tc| tc.sequence_order);

    let after = query.cursor.as_deref().and_then(decode_cursor).and_then(|c| c.s.parse::<u32>().ok());
    if let Some(after) = after {
        cases.retain(|tc| tc.sequence_order > after);
    }

    let limit = query.limit.clamp(1, 200);
    let next_cursor = cases.get(limit).map(|tc| encode_cursor(&tc.sequence_order.to_string(), tc.id));
    cases.truncate(limit);

    let items = cases
        .into_iter()
        .map(|tc| {
            let result = state.storage.results.get_by_test_case(tc.id).ok().flatten();
            TestCaseEntry { test_case: tc, result }
        })
        .collect();

    Ok(ApiResponse::ok(LogsPage { items, next_cursor }))
}

async fn log_detail(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((experiment_id, test_case_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<TestCaseEntry>>> {
    let experiment = state.storage.experiments.get(experiment_id)?.ok_or(AppError::NotFound("experiment".to_string()))?;
    project_scope(&state, owner_id, experiment.project_id).await?;
    let test_case = state.storage.test_cases.get(test_case_id)?.ok_or(AppError::NotFound("test case".to_string()))?;
    if test_case.experiment_id != experiment_id {
        return Err(AppError::NotFound("test case".to_string()));
    }
    let result = state.storage.results.get_by_test_case(test_case_id)?;
    Ok(ApiResponse::ok(TestCaseEntry { test_case, result }))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub vote: Vote,
    pub correction: Option<Correction>,
    pub comment: Option<String>,
}

async fn upsert_feedback(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((experiment_id, test_case_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<FeedbackRequest>,
) -> AppResult<Json<ApiResponse<Feedback>>> {
    let test_case = state.storage.test_cases.get(test_case_id)?.ok_or(AppError::NotFound("test case".to_string()))?;
    if test_case.experiment_id != experiment_id {
        return Err(AppError::NotFound("test case".to_string()));
    }
    let existing = state.storage.feedback.get_for_test_case_and_user(test_case_id, user_id)?;
    let feedback = Feedback {
        id: existing.map(|f| f.id).unwrap_or_else(Uuid::new_v4),
        test_case_id,
        user_id,
        vote: req.vote,
        correction: req.correction,
        comment: req.comment,
    };
    feedback.validate_shape().map_err(AppError::InvalidInput)?;
    state.storage.feedback.upsert(&feedback)?;
    Ok(ApiResponse::ok(feedback))
}

#[derive(Debug, Serialize)]
struct FeedbackSummary {
    total_test_cases: usize,
    with_feedback: usize,
    upvotes: usize,
    downvotes: usize,
}

async fn feedback_summary(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<FeedbackSummary>>> {
    let experiment = state.storage.experiments.get(experiment_id)?.ok_or(AppError::NotFound("experiment".to_string()))?;
    project_scope(&state, owner_id, experiment.project_id).await?;
    let cases = state.storage.test_cases.list_by_experiment(experiment_id)?;

    let mut with_feedback = 0usize;
    let mut upvotes = 0usize;
    let mut downvotes = 0usize;
    for tc in &cases {
        if let Some(feedback) = state.storage.feedback.get_for_test_case_and_user(tc.id, owner_id).ok().flatten() {
            with_feedback += 1;
            match feedback.vote {
                Vote::Up => upvotes += 1,
                Vote::Down => downvotes += 1,
            }
        }
    }

    Ok(ApiResponse::ok(FeedbackSummary { total_test_cases: cases.len(), with_feedback, upvotes, downvotes }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects/{project_id}/experiments", get(list).post(create))
        .route("/projects/{project_id}/experiments/{experiment_id}", get(get_one).delete(delete_experiment))
        .route("/projects/{project_id}/experiments/{experiment_id}/status", get(status))
        .route("/projects/{project_id}/experiments/{experiment_id}/cancel", post(cancel))
        .route("/experiments/{experiment_id}/dashboard", get(dashboard))
        .route("/experiments/{experiment_id}/logs", get(logs))
        .route("/experiments/{experiment_id}/logs/{test_case_id}", get(log_detail))
        .route(
            "/experiments/{experiment_id}/logs/{test_case_id}/feedback",
            post(upsert_feedback).delete(delete_feedback),
        )
        .route("/experiments/{experiment_id}/feedback-summary", get(feedback_summary))
}

async fn delete_feedback(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((_experiment_id, test_case_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    if let Some(feedback) = state.storage.feedback.get_for_test_case_and_user(test_case_id, user_id)? {
        state.storage.feedback.delete_for_test_case_and_user(test_case_id, feedback.user_id)?;
    }
    Ok(ApiResponse::ok(serde_json::json!({})))
}
