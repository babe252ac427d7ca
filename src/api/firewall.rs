use crate::api::auth::AuthUser;
use crate::api::state::AppState;
use crate::api_response::ApiResponse;
use crate::engine::scorer::percentile;
use crate::error::{AppError, AppResult};
use crate::firewall::{self, FirewallInput, Verdict};
use crate::llm::LlmGateway;
use crate::models::{FirewallLog, FirewallRule, RuleType};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(key) = value.strip_prefix("Bearer ") {
            return Some(key.to_string());
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    pub prompt: String,
    pub agent_prompt: Option<String>,
}

/// `POST /firewall/{project_id}` — public, API-key authenticated, runs C11.
async fn intake(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<IntakeRequest>,
) -> AppResult<Json<Verdict>> {
    let raw_api_key = extract_api_key(&headers).ok_or(AppError::AuthRequired)?;
    let project = state.storage.projects.get(project_id)?.ok_or(AppError::NotFound("project".to_string()))?;

    let gateway = state
        .storage
        .providers
        .list_by_owner(project.owner_id)?
        .into_iter()
        .find(|p| p.is_valid)
        .and_then(|p| LlmGateway::new(p, &state.vault, state.config.llm_judge_model.clone()).ok());

    let ip = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).map(str::to_string);
    let verdict = firewall::evaluate_prompt(
        &state.storage,
        &state.kv,
        gateway.as_ref(),
        state.config.firewall_rate_limit_per_minute,
        FirewallInput {
            project_id_path: project_id,
            prompt: &body.prompt,
            agent_prompt: body.agent_prompt.as_deref(),
            raw_api_key: &raw_api_key,
            ip: ip.as_deref(),
        },
    )
    .await?;
    Ok(Json(verdict))
}

async fn project_scope(state: &AppState, owner_id: Uuid, project_id: Uuid) -> AppResult<()> {
    let project = state.storage.projects.get(project_id)?.ok_or(AppError::NotFound("project".to_string()))?;
    if project.owner_id != owner_id {
        return Err(AppError::NotFound("project".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub rule_type: RuleType,
    pub pattern: Option<String>,
    pub policy: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

async fn list_rules(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<FirewallRule>>>> {
    project_scope(&state, owner_id, project_id).await?;
    Ok(ApiResponse::ok(state.storage.firewall_rules.list_by_project(project_id)?))
}

async fn create_rule(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateRuleRequest>,
) -> AppResult<Json<ApiResponse<FirewallRule>>> {
    project_scope(&state, owner_id, project_id).await?;
    let rule = FirewallRule {
        id: Uuid::new_v4(),
        project_id,
        name: req.name,
        rule_type: req.rule_type,
        pattern: req.pattern,
        policy: req.policy,
        priority: req.priority,
        active: req.active,
    };
    rule.validate_shape().map_err(AppError::InvalidInput)?;
    state.storage.firewall_rules.insert(&rule)?;
    firewall::invalidate_rules_cache(&state.kv, project_id).await;
    Ok(ApiResponse::ok(rule))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub policy: Option<String>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

async fn update_rule(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, rule_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateRuleRequest>,
) -> AppResult<Json<ApiResponse<FirewallRule>>> {
    project_scope(&state, owner_id, project_id).await?;
    let mut rule = state.storage.firewall_rules.get(rule_id)?.ok_or(AppError::NotFound("firewall rule".to_string()))?;
    if rule.project_id != project_id {
        return Err(AppError::NotFound("firewall rule".to_string()));
    }
    let old_priority = rule.priority;
    if let Some(name) = req.name {
        rule.name = name;
    }
    if let Some(pattern) = req.pattern {
        rule.pattern = Some(pattern);
    }
    if let Some(policy) = req.policy {
        rule.policy = Some(policy);
    }
    if let Some(priority) = req.priority {
        rule.priority = priority;
    }
    if let Some(active) = req.active {
        rule.active = active;
    }
    rule.validate_shape().map_err(AppError::InvalidInput)?;
    state.storage.firewall_rules.update(&rule, old_priority)?;
    firewall::invalidate_rules_cache(&state.kv, project_id).await;
    Ok(ApiResponse::ok(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path((project_id, rule_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    project_scope(&state, owner_id, project_id).await?;
    state.storage.firewall_rules.delete(rule_id)?;
    state.storage.firewall_logs.detach_rule(project_id, rule_id)?;
    firewall::invalidate_rules_cache(&state.kv, project_id).await;
    Ok(ApiResponse::ok(serde_json::json!({})))
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
struct LogsPage {
    items: Vec<FirewallLog>,
    next_cursor: Option<String>,
}

async fn list_logs(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<ApiResponse<LogsPage>>> {
    project_scope(&state, owner_id, project_id).await?;
    let after = query.cursor.as_deref().and_then(decode_cursor).and_then(|c| c.s.parse::<i64>().ok());
    let limit = query.limit.clamp(1, 200);
    let mut logs = state.storage.firewall_logs.list_by_project(project_id, after, limit + 1)?;
    let next_cursor = if logs.len() > limit {
        logs.truncate(limit);
        logs.last().map(|l| encode_cursor(&l.created_at.timestamp_micros().to_string(), l.id))
    } else {
        None
    };
    Ok(ApiResponse::ok(LogsPage { items: logs, next_cursor }))
}

#[derive(Debug, Serialize)]
struct WindowStats {
    total: usize,
    passed: usize,
    blocked: usize,
    pass_rate: f64,
    category_breakdown: HashMap<String, usize>,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
    daily_breakdown: HashMap<String, usize>,
}

fn window_stats(logs: &[FirewallLog]) -> WindowStats {
    let total = logs.len();
    let passed = logs.iter().filter(|l| l.verdict).count();
    let blocked = total - passed;
    let pass_rate = if total > 0 { passed as f64 / total as f64 } else { 0.0 };

    let mut category_breakdown: HashMap<String, usize> = HashMap::new();
    for log in logs {
        if let Some(category) = log.fail_category {
            *category_breakdown.entry(format!("{category:?}")).or_default() += 1;
        }
    }

    let mut latencies: Vec<u64> = logs.iter().map(|l| l.latency_ms).collect();
    latencies.sort_unstable();
    let avg_latency_ms = if total > 0 { latencies.iter().sum::<u64>() as f64 / total as f64 } else { 0.0 };
    let p95_latency_ms = percentile(&latencies, 0.95);
    let p99_latency_ms = percentile(&latencies, 0.99);

    let mut daily_breakdown: HashMap<String, usize> = HashMap::new();
    for log in logs {
        *daily_breakdown.entry(log.created_at.format("%Y-%m-%d").to_string()).or_default() += 1;
    }

    WindowStats { total, passed, blocked, pass_rate, category_breakdown, avg_latency_ms, p95_latency_ms, p99_latency_ms, daily_breakdown }
}

#[derive(Debug, Serialize)]
struct Stats {
    #[serde(rename = "24h")]
    last_24h: WindowStats,
    #[serde(rename = "7d")]
    last_7d: WindowStats,
    #[serde(rename = "30d")]
    last_30d: WindowStats,
}

async fn stats(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Stats>>> {
    project_scope(&state, owner_id, project_id).await?;
    let all_logs = state.storage.firewall_logs.list_by_project(project_id, None, usize::MAX)?;
    let now = Utc::now();

    let window = |days: i64| -> Vec<FirewallLog> {
        let cutoff = now - Duration::days(days);
        all_logs.iter().filter(|l| l.created_at >= cutoff).cloned().collect()
    };

    Ok(ApiResponse::ok(Stats {
        last_24h: window_stats(&window(1)),
        last_7d: window_stats(&window(7)),
        last_30d: window_stats(&window(30)),
    }))
}

#[derive(Debug, Serialize)]
struct Integration {
    endpoint_url: String,
    snippets: HashMap<String, String>,
}

async fn integration(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Integration>>> {
    project_scope(&state, owner_id, project_id).await?;
    let endpoint_url = format!("{}/firewall/{}", state.config.api_v1_prefix, project_id);

    let mut snippets = HashMap::new();
    snippets.insert(
        "curl".to_string(),
        format!(
            "curl -X POST {endpoint_url} \\\n  -H \"Authorization: Bearer <project_api_key>\" \\\n  -H \"Content-Type: application/json\" \\\n  -d '{{\"prompt\": \"...\"}}'"
        ),
    );
    snippets.insert(
        "python".to_string(),
        format!(
            "import requests\n\nresponse = requests.post(\n    \"{endpoint_url}\",\n    headers={{\"Authorization\": \"Bearer <project_api_key>\"}},\n    json={{\"prompt\": \"...\"}},\n)\n"
        ),
    );
    snippets.insert(
        "javascript".to_string(),
        format!(
            "const response = await fetch(\"{endpoint_url}\", {{\n  method: \"POST\",\n  headers: {{ \"Authorization\": \"Bearer <project_api_key>\", \"Content-Type\": \"application/json\" }},\n  body: JSON.stringify({{ prompt: \"...\" }}),\n}});\n"
        ),
    );

    Ok(ApiResponse::ok(Integration { endpoint_url, snippets }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/firewall/{project_id}", post(intake))
        .route("/projects/{project_id}/firewall/rules", get(list_rules).post(create_rule))
        .route(
            "/projects/{project_id}/firewall/rules/{rule_id}",
            axum::routing::put(update_rule).delete(delete_rule),
        )
        .route("/projects/{project_id}/firewall/logs", get(list_logs))
        .route("/projects/{project_id}/firewall/stats", get(stats))
        .route("/projects/{project_id}/firewall/integration", get(integration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrips_sort_value_and_id() {
        let id = Uuid::new_v4();
        let encoded = encode_cursor("1700000000000000", id);
        let decoded = decode_cursor(&encoded).unwrap();
        assert_eq!(decoded.s, "1700000000000000");
        assert_eq!(decoded.id, id);
    }

    #[test]
    fn window_stats_computes_pass_rate_and_breakdowns() {
        let logs = vec![
            FirewallLog {
                id: Uuid::new_v4(),
                project_id: Uuid::new_v4(),
                matched_rule: None,
                prompt_hash: "a".to_string(),
                prompt_preview: "hi".to_string(),
                agent_prompt_hash: None,
                verdict: true,
                fail_category: None,
                explanation: None,
                confidence: None,
                latency_ms: 10,
                ip_address: None,
                created_at: Utc::now(),
            },
            FirewallLog {
                id: Uuid::new_v4(),
                project_id: Uuid::new_v4(),
                matched_rule: None,
                prompt_hash: "b".to_string(),
                prompt_preview: "bye".to_string(),
                agent_prompt_hash: None,
                verdict: false,
                fail_category: Some(crate::models::FailCategory::Restriction),
                explanation: None,
                confidence: None,
                latency_ms: 20,
                ip_address: None,
                created_at: Utc::now(),
            },
        ];
        let stats = window_stats(&logs);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.pass_rate, 0.5);
        assert_eq!(stats.category_breakdown.get("Restriction"), Some(&1));
    }
}
