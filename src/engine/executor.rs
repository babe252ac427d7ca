use crate::error::AppError;
use crate::llm::{ChatMessage, ChatOptions, LlmGateway};
use crate::models::{AuthType, TargetConfig};
use crate::security::SecretVault;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::warn;

pub struct TargetResponse {
    /// `None` when the target returned a non-429 error status after
    /// retries were exhausted (spec §4.6) — a judged "error" result, not
    /// a fatal failure of the run.
    pub text: Option<String>,
    pub latency_ms: u64,
}

/// Dispatches a single prompt at a target: either the in-process LLM
/// gateway (`direct://<provider_uuid>`) or an arbitrary HTTP endpoint
/// described by `TargetConfig`, extracting the reply via a JSON path
/// (spec §4.4/§4.6). `retries`/`backoff_base` drive the 429 retry loop;
/// on retry exhaustion the call raises `AppError::RateLimitExceeded`,
/// which the runner treats as fatal for the whole experiment.
pub async fn execute_prompt(
    target: &TargetConfig,
    gateway: Option<&LlmGateway>,
    http: &reqwest::Client,
    vault: &SecretVault,
    prompt: &str,
    thread_id: Option<&str>,
    retries: u32,
    backoff_base: f64,
) -> anyhow::Result<TargetResponse> {
    let started = Instant::now();
    if target.is_direct() {
        let gateway = gateway.ok_or_else(|| anyhow::anyhow!("direct target requires a resolved provider gateway"))?;
        let mut messages = Vec::new();
        if let Some(system_prompt) = &target.system_prompt {
            messages.push(ChatMessage::system(system_prompt.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        let text = gateway.chat(&messages, &ChatOptions::default()).await?;
        return Ok(TargetResponse { text: Some(text), latency_ms: started.elapsed().as_millis() as u64 });
    }

    let body = render_payload(&target.payload_template, prompt, thread_id, target.system_prompt.as_deref());
    let mut attempt = 0u32;
    loop {
        let mut request = match target.method {
            crate::models::HttpMethod::Post => http.post(&target.endpoint_url),
            crate::models::HttpMethod::Put => http.put(&target.endpoint_url),
            crate::models::HttpMethod::Get => http.get(&target.endpoint_url),
        };
        request = request.timeout(Duration::from_secs(target.timeout_seconds));
        request = apply_auth(request, target, vault)?;
        for (name, value) in &target.headers {
            request = request.header(name, value);
        }
        request = request.header("content-type", "application/json").body(body.clone());

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;

        if status.is_success() {
            let value: Value = serde_json::from_str(&raw)?;
            let text = extract_json_path(&value, &target.response_json_path).ok_or_else(|| {
                anyhow::anyhow!("response_json_path {} not found in target reply", target.response_json_path)
            })?;
            return Ok(TargetResponse { text: Some(text), latency_ms: started.elapsed().as_millis() as u64 });
        }

        if status.as_u16() == 429 {
            if attempt >= retries {
                return Err(AppError::RateLimitExceeded(format!(
                    "target {} exhausted {retries} retries on 429",
                    target.endpoint_url
                ))
                .into());
            }
            let delay = Duration::from_secs_f64(backoff_base.powi(attempt as i32));
            warn!(endpoint = %target.endpoint_url, attempt, delay_secs = delay.as_secs_f64(), "target rate limited, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        if attempt >= retries {
            warn!(endpoint = %target.endpoint_url, status = %status, "target returned an error status after retries exhausted");
            return Ok(TargetResponse { text: None, latency_ms: started.elapsed().as_millis() as u64 });
        }
        attempt += 1;
    }
}

/// Calls `thread_endpoint_url` once to mint a conversation/thread id for
/// multi-turn targets, extracting it via `thread_id_path`.
pub async fn init_thread(target: &TargetConfig, http: &reqwest::Client, vault: &SecretVault) -> anyhow::Result<String> {
    let endpoint = target
        .thread_endpoint_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("multi_turn target missing thread_endpoint_url"))?;
    let path = target
        .thread_id_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("multi_turn target missing thread_id_path"))?;

    let mut request = http.post(endpoint).timeout(Duration::from_secs(target.timeout_seconds));
    request = apply_auth(request, target, vault)?;
    let response = request.send().await?;
    let raw = response.text().await?;
    let value: Value = serde_json::from_str(&raw)?;
    extract_json_path(&value, path).ok_or_else(|| anyhow::anyhow!("thread_id_path {path} not found in thread init reply"))
}

fn apply_auth(
    mut request: reqwest::RequestBuilder,
    target: &TargetConfig,
    vault: &SecretVault,
) -> anyhow::Result<reqwest::RequestBuilder> {
    let Some(encrypted) = &target.auth_value else {
        return Ok(request);
    };
    match target.auth_type {
        AuthType::None => {}
        AuthType::Bearer => {
            let token = vault.decrypt(encrypted)?;
            request = request.bearer_auth(token);
        }
        AuthType::ApiKey => {
            let key = vault.decrypt(encrypted)?;
            request = request.header("x-api-key", key);
        }
        AuthType::Basic => {
            let decoded = vault.decrypt(encrypted)?;
            let (user, pass) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
            request = request.basic_auth(user, Some(pass));
        }
    }
    Ok(request)
}

/// Substitutes `{{prompt}}`/`{{thread_id}}`/`{{system_prompt}}` into the
/// payload template (spec §4.6). When `system_prompt` is set but the
/// template never references `{{system_prompt}}`, and the rendered body
/// has a top-level `messages` array, a `{role: "system", ...}` entry is
/// inserted at index 0 so the system prompt still reaches the target.
fn render_payload(template: &str, prompt: &str, thread_id: Option<&str>, system_prompt: Option<&str>) -> String {
    let escaped_prompt = json_escape(prompt);
    let mut body = template.replace("{{prompt}}", &escaped_prompt);
    if let Some(id) = thread_id {
        body = body.replace("{{thread_id}}", id);
    }
    let Some(system_prompt) = system_prompt else {
        return body;
    };
    if body.contains("{{system_prompt}}") {
        return body.replace("{{system_prompt}}", &json_escape(system_prompt));
    }
    inject_system_message(&body, system_prompt).unwrap_or(body)
}

fn json_escape(text: &str) -> String {
    serde_json::to_string(text).map(|s| s[1..s.len() - 1].to_string()).unwrap_or_default()
}

fn inject_system_message(body: &str, system_prompt: &str) -> Option<String> {
    let mut value: Value = serde_json::from_str(body).ok()?;
    let messages = value.get_mut("messages")?.as_array_mut()?;
    messages.insert(0, serde_json::json!({"role": "system", "content": system_prompt}));
    serde_json::to_string(&value).ok()
}

/// Minimal `$.a.b[0].c` JSON path resolver; the spec's response paths
/// never need wildcards or filters, just field/index traversal.
fn extract_json_path(value: &Value, path: &str) -> Option<String> {
    let trimmed = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut current = value;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (field, indices) = split_indices(segment);
        if !field.is_empty() {
            current = current.get(field)?;
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    match current {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut field_end = segment.len();
    let mut indices = Vec::new();
    if let Some(bracket) = segment.find('[') {
        field_end = bracket;
        let mut rest = &segment[bracket..];
        while let Some(close) = rest.find(']') {
            if let Ok(n) = rest[1..close].parse::<usize>() {
                indices.push(n);
            }
            rest = &rest[close + 1..];
            if !rest.starts_with('[') {
                break;
            }
        }
    }
    (&segment[..field_end], indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_dot_path() {
        let value = serde_json::json!({"response": "hello"});
        assert_eq!(extract_json_path(&value, "$.response"), Some("hello".to_string()));
    }

    #[test]
    fn extracts_nested_array_path() {
        let value = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_json_path(&value, "$.choices[0].message.content"), Some("hi".to_string()));
    }

    #[test]
    fn missing_path_returns_none() {
        let value = serde_json::json!({"other": "x"});
        assert_eq!(extract_json_path(&value, "$.response"), None);
    }

    #[test]
    fn render_payload_substitutes_prompt_and_thread() {
        let body = render_payload(r#"{"prompt":"{{prompt}}","thread":"{{thread_id}}"}"#, "say \"hi\"", Some("t1"), None);
        assert!(body.contains(r#""thread":"t1""#));
        assert!(body.contains(r#"say \"hi\""#));
    }

    #[test]
    fn render_payload_substitutes_explicit_system_prompt_placeholder() {
        let body = render_payload(r#"{"system":"{{system_prompt}}","prompt":"{{prompt}}"}"#, "hi", None, Some("be nice"));
        assert!(body.contains(r#""system":"be nice""#));
    }

    #[test]
    fn render_payload_injects_system_message_into_messages_array() {
        let template = r#"{"messages":[{"role":"user","content":"{{prompt}}"}]}"#;
        let body = render_payload(template, "hi", None, Some("be nice"));
        let value: Value = serde_json::from_str(&body).unwrap();
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be nice");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn render_payload_leaves_body_untouched_without_messages_array_or_placeholder() {
        let body = render_payload(r#"{"prompt":"{{prompt}}"}"#, "hi", None, Some("be nice"));
        assert!(!body.contains("be nice"));
    }
}
