use crate::api::auth::AuthUser;
use crate::api::state::AppState;
use crate::api_response::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::llm::LlmGateway;
use crate::models::{ModelProvider, ProviderType};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub provider_type: ProviderType,
    pub api_key: String,
    pub endpoint_url: Option<String>,
    pub model: Option<String>,
}

fn owned_or_not_found(provider: ModelProvider, owner_id: Uuid) -> AppResult<ModelProvider> {
    if provider.owner_id != owner_id {
        return Err(AppError::NotFound("provider".to_string()));
    }
    Ok(provider)
}

async fn list(State(state): State<AppState>, AuthUser(owner_id): AuthUser) -> AppResult<Json<ApiResponse<Vec<ModelProvider>>>> {
    let providers = state.storage.providers.list_by_owner(owner_id)?;
    Ok(ApiResponse::ok(providers))
}

async fn create(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Json(req): Json<CreateProviderRequest>,
) -> AppResult<Json<ApiResponse<ModelProvider>>> {
    let encrypted_api_key = state.vault.encrypt(&req.api_key)?;
    let mut provider = ModelProvider::new(owner_id, req.name, req.provider_type, encrypted_api_key, req.endpoint_url, req.model);
    provider.validate_shape().map_err(AppError::InvalidInput)?;
    state.storage.providers.insert(&provider)?;
    Ok(ApiResponse::ok(provider))
}

async fn get_one(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ModelProvider>>> {
    let provider = state.storage.providers.get(id)?.ok_or(AppError::NotFound("provider".to_string()))?;
    Ok(ApiResponse::ok(owned_or_not_found(provider, owner_id)?))
}

async fn delete(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let provider = state.storage.providers.get(id)?.ok_or(AppError::NotFound("provider".to_string()))?;
    owned_or_not_found(provider, owner_id)?;
    state.storage.providers.delete(id)?;
    Ok(ApiResponse::ok(serde_json::json!({})))
}

/// `POST /providers/{id}/validate` — probes the stored credential via C1
/// and persists the resulting `is_valid` flag (spec §6).
async fn validate(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ModelProvider>>> {
    let mut provider = state.storage.providers.get(id)?.ok_or(AppError::NotFound("provider".to_string()))?;
    owned_or_not_found(provider.clone(), owner_id)?;

    let gateway = LlmGateway::new(provider.clone(), &state.vault, state.config.llm_judge_model.clone())?;
    let (ok, _reason) = gateway.validate_credentials().await;
    provider.is_valid = ok;
    provider.updated_at = chrono::Utc::now();
    state.storage.providers.update(&provider)?;
    Ok(ApiResponse::ok(provider))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/providers", get(list).post(create))
        .route("/providers/{id}", get(get_one).delete(delete))
        .route("/providers/{id}/validate", post(validate))
}
