use crate::api::auth::AuthUser;
use crate::api::state::AppState;
use crate::api_response::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::models::Project;
use crate::security::api_key;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub business_scope: String,
    #[serde(default)]
    pub allowed_intents: Vec<String>,
    #[serde(default)]
    pub restricted_intents: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedProject {
    #[serde(flatten)]
    pub project: Project,
    /// Shown exactly once at creation time.
    pub api_key: String,
}

fn owned_or_not_found(project: Project, owner_id: Uuid) -> AppResult<Project> {
    if project.owner_id != owner_id {
        return Err(AppError::NotFound("project".to_string()));
    }
    Ok(project)
}

async fn list(State(state): State<AppState>, AuthUser(owner_id): AuthUser) -> AppResult<Json<ApiResponse<Vec<Project>>>> {
    Ok(ApiResponse::ok(state.storage.projects.list_by_owner(owner_id)?))
}

async fn create(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> AppResult<Json<ApiResponse<CreatedProject>>> {
    let issued = api_key::generate();
    let project = Project::new(
        owner_id,
        req.name,
        req.business_scope,
        req.allowed_intents,
        req.restricted_intents,
        issued.hash,
        issued.prefix,
    );
    state.storage.projects.insert(&project)?;
    Ok(ApiResponse::ok(CreatedProject { project, api_key: issued.raw }))
}

async fn get_one(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Project>>> {
    let project = state.storage.projects.get(id)?.ok_or(AppError::NotFound("project".to_string()))?;
    Ok(ApiResponse::ok(owned_or_not_found(project, owner_id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub business_scope: Option<String>,
    pub allowed_intents: Option<Vec<String>>,
    pub restricted_intents: Option<Vec<String>>,
    pub active: Option<bool>,
}

async fn update(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> AppResult<Json<ApiResponse<Project>>> {
    let mut project = owned_or_not_found(
        state.storage.projects.get(id)?.ok_or(AppError::NotFound("project".to_string()))?,
        owner_id,
    )?;
    if let Some(name) = req.name {
        project.name = name;
    }
    if let Some(scope) = req.business_scope {
        project.business_scope = scope;
    }
    if let Some(allowed) = req.allowed_intents {
        project.allowed_intents = allowed;
    }
    if let Some(restricted) = req.restricted_intents {
        project.restricted_intents = restricted;
    }
    if let Some(active) = req.active {
        project.active = active;
    }
    project.updated_at = chrono::Utc::now();
    state.storage.projects.update(&project)?;
    crate::firewall::invalidate_scope_cache(&state.kv, project.id).await;
    Ok(ApiResponse::ok(project))
}

async fn delete(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let project = owned_or_not_found(
        state.storage.projects.get(id)?.ok_or(AppError::NotFound("project".to_string()))?,
        owner_id,
    )?;
    let running = state
        .storage
        .experiments
        .list_by_project(project.id)?
        .iter()
        .any(|e| e.status == crate::models::ExperimentStatus::Running);
    if running {
        return Err(AppError::Conflict("project has a running experiment".to_string()));
    }
    state.storage.projects.delete(id)?;
    Ok(ApiResponse::ok(serde_json::json!({})))
}

/// `POST /projects/{id}/analyze-scope` — calls C1 to turn free-form
/// business scope text into structured intent lists (spec §6).
#[derive(Debug, Serialize, Deserialize)]
struct AnalyzedScope {
    allowed_intents: Vec<String>,
    restricted_intents: Vec<String>,
}

async fn analyze_scope(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Project>>> {
    let mut project = owned_or_not_found(
        state.storage.projects.get(id)?.ok_or(AppError::NotFound("project".to_string()))?,
        owner_id,
    )?;
    let providers = state.storage.providers.list_by_owner(owner_id)?;
    let provider = providers
        .into_iter()
        .find(|p| p.is_valid)
        .ok_or_else(|| AppError::InvalidInput("no validated provider available to analyze scope".to_string()))?;
    let gateway = crate::llm::LlmGateway::new(provider, &state.vault, state.config.llm_judge_model.clone())?;

    let system = "Given a business scope description, produce a JSON object with \
\"allowed_intents\" and \"restricted_intents\" string arrays summarizing what an \
AI assistant operating in this scope should and should not help with.";
    let messages = vec![
        crate::llm::ChatMessage::system(system),
        crate::llm::ChatMessage::user(project.business_scope.clone()),
    ];
    let opts = crate::llm::ChatOptions { temperature: Some(0.0), json_mode: true, ..Default::default() };
    let raw = gateway.chat(&messages, &opts).await?;
    let (start, end) = (raw.find('{'), raw.rfind('}'));
    if let (Some(start), Some(end)) = (start, end) {
        if let Ok(analyzed) = serde_json::from_str::<AnalyzedScope>(&raw[start..=end]) {
            project.allowed_intents = analyzed.allowed_intents;
            project.restricted_intents = analyzed.restricted_intents;
            project.analyzed_scope = Some(serde_json::to_value(&project.allowed_intents)?);
        }
    }
    project.updated_at = chrono::Utc::now();
    state.storage.projects.update(&project)?;
    crate::firewall::invalidate_scope_cache(&state.kv, project.id).await;
    Ok(ApiResponse::ok(project))
}

/// `POST /projects/{id}/regenerate-api-key` — rotates the key and
/// invalidates the old hash's auth cache entry (spec §6).
async fn regenerate_api_key(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CreatedProject>>> {
    let project = owned_or_not_found(
        state.storage.projects.get(id)?.ok_or(AppError::NotFound("project".to_string()))?,
        owner_id,
    )?;
    let old_hash = project.api_key_hash.clone();
    let issued = api_key::generate();
    let project = state.storage.projects.rotate_api_key(id, &old_hash, &issued.hash, &issued.prefix)?;
    crate::firewall::invalidate_auth_cache(&state.kv, &old_hash).await;
    Ok(ApiResponse::ok(CreatedProject { project, api_key: issued.raw }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list).post(create))
        .route("/projects/{id}", get(get_one).put(update).delete(delete))
        .route("/projects/{id}/analyze-scope", post(analyze_scope))
        .route("/projects/{id}/regenerate-api-key", post(regenerate_api_key))
}
