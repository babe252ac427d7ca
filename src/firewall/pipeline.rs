use crate::cache::{auth_cache_key, rate_limit_key, rules_cache_key, scope_cache_key, SharedKvStore};
use crate::error::AppError;
use crate::firewall::patterns;
use crate::llm::{ChatMessage, ChatOptions, LlmGateway};
use crate::models::{truncate_preview, FailCategory, FirewallLog};
use crate::storage::Storage;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: bool,
    pub fail_category: Option<FailCategory>,
    pub explanation: String,
    pub confidence: f64,
    pub matched_rule: Option<String>,
}

pub struct FirewallInput<'a> {
    pub project_id_path: Uuid,
    pub prompt: &'a str,
    pub agent_prompt: Option<&'a str>,
    pub raw_api_key: &'a str,
    pub ip: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAuth {
    project_id: Uuid,
    owner_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScope {
    business_scope: String,
    allowed_intents: Vec<String>,
    restricted_intents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    status: bool,
    #[serde(default)]
    fail_category: Option<String>,
    explanation: String,
    confidence: f64,
}

/// Runs the 8-step request/response pipeline (spec §4.11), returning a
/// `Verdict` and writing a fire-and-forget `FirewallLog`.
pub async fn evaluate_prompt(
    storage: &Storage,
    kv: &SharedKvStore,
    judge_gateway: Option<&LlmGateway>,
    rate_limit_per_minute: u64,
    input: FirewallInput<'_>,
) -> Result<Verdict, AppError> {
    let started = Instant::now();
    let key_hash = hex::encode(Sha256::digest(input.raw_api_key.as_bytes()));

    let auth = authenticate(storage, kv, &key_hash).await?;
    if auth.project_id != input.project_id_path {
        return Err(AppError::NotFound("project".to_string()));
    }

    check_rate_limit(kv, auth.project_id, rate_limit_per_minute).await?;

    let scope = load_scope(storage, kv, auth.project_id).await?;
    let rules = load_rules(storage, kv, auth.project_id).await?;

    if let Some(matched) = patterns::first_match(&rules, input.prompt) {
        let verdict = Verdict {
            status: matched.allow,
            fail_category: (!matched.allow).then_some(FailCategory::Restriction),
            explanation: if matched.allow {
                format!("Allowed by pattern rule: {}", matched.rule.name)
            } else {
                format!("Blocked by pattern rule: {}", matched.rule.name)
            },
            confidence: 1.0,
            matched_rule: Some(matched.rule.name.clone()),
        };
        spawn_log(storage, &input, auth.project_id, &verdict, started.elapsed());
        return Ok(verdict);
    }

    let custom_policies: Vec<String> = rules
        .iter()
        .filter_map(|r| (r.rule_type == crate::models::RuleType::CustomPolicy).then(|| r.policy.clone()).flatten())
        .collect();

    let Some(gateway) = judge_gateway else {
        return Err(AppError::UpstreamFailed("no judge provider configured for firewall".to_string()));
    };
    let verdict = judge_with_llm(gateway, &scope, &custom_policies, input.agent_prompt.unwrap_or(input.prompt)).await?;

    spawn_log(storage, &input, auth.project_id, &verdict, started.elapsed());
    Ok(verdict)
}

async fn authenticate(storage: &Storage, kv: &SharedKvStore, key_hash: &str) -> Result<CachedAuth, AppError> {
    let cache_key = auth_cache_key(key_hash);
    if let Ok(Some(cached)) = kv.get(&cache_key).await {
        if cached == "null" {
            return Err(AppError::AuthInvalid);
        }
        if let Ok(auth) = serde_json::from_str::<CachedAuth>(&cached) {
            return Ok(auth);
        }
    }

    match storage.projects.get_by_api_key_hash(key_hash) {
        Ok(Some(project)) if project.active => {
            let auth = CachedAuth { project_id: project.id, owner_id: project.owner_id };
            let payload = serde_json::to_string(&auth).unwrap_or_default();
            kv.set_ex(&cache_key, &payload, crate::cache::FIREWALL_AUTH_TTL).await.ok();
            Ok(auth)
        }
        _ => {
            kv.set_ex(&cache_key, "null", crate::cache::FIREWALL_AUTH_TTL).await.ok();
            Err(AppError::AuthInvalid)
        }
    }
}

/// Fails open on KV errors, per spec §4.11 step 3; fails closed only when
/// the limit is actually exceeded.
async fn check_rate_limit(kv: &SharedKvStore, project_id: Uuid, limit: u64) -> Result<(), AppError> {
    let now_ms = chrono::Utc::now().timestamp_millis() as f64;
    let window_start = now_ms - crate::cache::RATE_LIMIT_WINDOW_SECS * 1000.0;
    let member = format!("{now_ms}:{}", Uuid::new_v4());

    match kv.zadd_and_count(&rate_limit_key(project_id), window_start, &member, now_ms).await {
        Ok(count) if count >= limit => {
            let retry_after = kv
                .zmin_score(&rate_limit_key(project_id))
                .await
                .ok()
                .flatten()
                .map(|oldest| ((oldest + crate::cache::RATE_LIMIT_WINDOW_SECS * 1000.0 - now_ms).max(0.0) / 1000.0) as u64)
                .unwrap_or(1);
            Err(AppError::RateLimited { retry_after_secs: retry_after.max(1) })
        }
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(error = %err, "firewall rate limiter unreachable, failing open");
            Ok(())
        }
    }
}

async fn load_scope(storage: &Storage, kv: &SharedKvStore, project_id: Uuid) -> Result<CachedScope, AppError> {
    let cache_key = scope_cache_key(project_id);
    if let Ok(Some(cached)) = kv.get(&cache_key).await {
        if let Ok(scope) = serde_json::from_str::<CachedScope>(&cached) {
            return Ok(scope);
        }
    }
    let project = storage
        .projects
        .get(project_id)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("project".to_string()))?;
    let scope = CachedScope {
        business_scope: project.business_scope,
        allowed_intents: project.allowed_intents,
        restricted_intents: project.restricted_intents,
    };
    if let Ok(payload) = serde_json::to_string(&scope) {
        kv.set_ex(&cache_key, &payload, crate::cache::FIREWALL_SCOPE_TTL).await.ok();
    }
    Ok(scope)
}

async fn load_rules(storage: &Storage, kv: &SharedKvStore, project_id: Uuid) -> Result<Vec<crate::models::FirewallRule>, AppError> {
    let cache_key = rules_cache_key(project_id);
    if let Ok(Some(cached)) = kv.get(&cache_key).await {
        if let Ok(rules) = serde_json::from_str(&cached) {
            return Ok(rules);
        }
    }
    let rules = storage
        .firewall_rules
        .list_active_by_project(project_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if let Ok(payload) = serde_json::to_string(&rules) {
        kv.set_ex(&cache_key, &payload, crate::cache::FIREWALL_RULES_TTL).await.ok();
    }
    Ok(rules)
}

async fn judge_with_llm(
    gateway: &LlmGateway,
    scope: &CachedScope,
    custom_policies: &[String],
    prompt: &str,
) -> Result<Verdict, AppError> {
    let system = format!(
        "You are a runtime firewall for an AI application. Business scope: {}. \
Allowed intents: {}. Restricted intents: {}. Additional policies:\n{}\n\n\
Evaluate the prompt below. Respond with strict JSON: \"status\" (true=allow, \
false=block), \"fail_category\" (one of \"off_topic\", \"violation\", \
\"restriction\", or null), \"explanation\" (one sentence), \"confidence\" (0.0-1.0).",
        scope.business_scope,
        scope.allowed_intents.join(", "),
        scope.restricted_intents.join(", "),
        custom_policies.join("\n"),
    );
    let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
    let opts = ChatOptions { temperature: Some(0.0), json_mode: true, ..Default::default() };

    let raw = gateway.chat(&messages, &opts).await.map_err(|_| AppError::UpstreamFailed("firewall judge unreachable".to_string()))?;
    let start = raw.find('{').ok_or_else(|| AppError::UpstreamFailed("malformed judge response".to_string()))?;
    let end = raw.rfind('}').ok_or_else(|| AppError::UpstreamFailed("malformed judge response".to_string()))?;
    let parsed: JudgeVerdict = serde_json::from_str(&raw[start..=end])
        .map_err(|_| AppError::UpstreamFailed("malformed judge response".to_string()))?;

    let fail_category = match parsed.fail_category.as_deref() {
        Some("off_topic") => Some(FailCategory::OffTopic),
        Some("violation") => Some(FailCategory::Violation),
        Some("restriction") => Some(FailCategory::Restriction),
        _ => None,
    };
    Ok(Verdict {
        status: parsed.status,
        fail_category,
        explanation: parsed.explanation,
        confidence: parsed.confidence,
        matched_rule: None,
    })
}

fn spawn_log(storage: &Storage, input: &FirewallInput<'_>, project_id: Uuid, verdict: &Verdict, elapsed: Duration) {
    let log = FirewallLog {
        id: Uuid::new_v4(),
        project_id,
        matched_rule: verdict.matched_rule.clone(),
        prompt_hash: hex::encode(Sha256::digest(input.prompt.as_bytes())),
        prompt_preview: truncate_preview(input.prompt),
        agent_prompt_hash: input.agent_prompt.map(|p| hex::encode(Sha256::digest(p.as_bytes()))),
        verdict: verdict.status,
        fail_category: verdict.fail_category,
        explanation: Some(verdict.explanation.clone()),
        confidence: Some(verdict.confidence),
        latency_ms: elapsed.as_millis() as u64,
        ip_address: input.ip.map(str::to_string),
        created_at: Utc::now(),
    };
    let logs = storage.firewall_logs.clone();
    tokio::spawn(async move {
        if let Err(err) = logs.insert(&log) {
            warn!(error = %err, "failed to write firewall log");
        }
    });
}

/// Called by the API layer after an auth-affecting mutation (key rotation,
/// project deactivation) so the negative/positive cache entry doesn't
/// outlive the change (spec §9 "Cache invalidation").
pub async fn invalidate_auth_cache(kv: &SharedKvStore, key_hash: &str) {
    kv.delete(&auth_cache_key(key_hash)).await.ok();
}

pub async fn invalidate_scope_cache(kv: &SharedKvStore, project_id: Uuid) {
    kv.delete(&scope_cache_key(project_id)).await.ok();
}

pub async fn invalidate_rules_cache(kv: &SharedKvStore, project_id: Uuid) {
    kv.delete(&rules_cache_key(project_id)).await.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_auth_roundtrips_through_json() {
        let auth = CachedAuth { project_id: Uuid::new_v4(), owner_id: Uuid::new_v4() };
        let encoded = serde_json::to_string(&auth).unwrap();
        let decoded: CachedAuth = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.project_id, auth.project_id);
    }
}
