use crate::error::{AppError, AppResult};
use crate::llm::retry::{exponential_backoff, looks_rate_limited, parse_retry_after, MAX_ATTEMPTS};
use crate::models::{ModelProvider, ProviderType};
use crate::security::SecretVault;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{azure, groq, openai};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Requests strict JSON-object output where the provider supports it.
    pub json_mode: bool,
}

/// `groq`'s default chat model when a provider omits `model` (spec §4.1).
const GROQ_DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// Uniform `chat(messages, opts) -> text` over provider flavours, with
/// retry on rate-limit and a credential probe, grounded in
/// `node/agent.rs`'s per-model rig-core dispatch.
pub struct LlmGateway {
    provider: ModelProvider,
    api_key: String,
    judge_model: String,
}

impl LlmGateway {
    pub fn new(provider: ModelProvider, vault: &SecretVault, judge_model: String) -> AppResult<Self> {
        let api_key = vault.decrypt(&provider.encrypted_api_key)?;
        Ok(Self { provider, api_key, judge_model })
    }

    fn resolve_model(&self) -> String {
        if let Some(model) = &self.provider.model {
            return model.clone();
        }
        match self.provider.provider_type {
            ProviderType::Groq => GROQ_DEFAULT_MODEL.to_string(),
            ProviderType::Openai | ProviderType::AzureOpenai => self.judge_model.clone(),
        }
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> AppResult<String> {
        let mut attempt = 0u32;
        loop {
            match self.chat_once(messages, opts).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let message = err.to_string();
                    if !looks_rate_limited(&message) {
                        return Err(AppError::UpstreamFailed(message));
                    }
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(AppError::RateLimitExceeded(format!(
                            "{} exhausted {MAX_ATTEMPTS} retries",
                            self.provider.name
                        )));
                    }
                    let delay = parse_retry_after(&message).unwrap_or_else(|| exponential_backoff(attempt));
                    warn!(provider = %self.provider.name, attempt, delay_secs = delay.as_secs_f64(), "llm rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn chat_once(&self, messages: &[ChatMessage], opts: &ChatOptions) -> anyhow::Result<String> {
        let (system, input) = split_preamble(messages)?;
        let model = self.resolve_model();
        let extra = json_mode_params(opts.json_mode);

        match self.provider.provider_type {
            ProviderType::Openai => {
                let client = openai::Client::new(&self.api_key);
                let mut builder = client.agent(&model);
                if !system.is_empty() {
                    builder = builder.preamble(&system);
                }
                if let Some(temp) = opts.temperature {
                    builder = builder.temperature(temp);
                }
                if let Some(value) = extra {
                    builder = builder.additional_params(value);
                }
                let agent = builder.build();
                Ok(agent.prompt(input.as_str()).await?)
            }
            ProviderType::AzureOpenai => {
                let endpoint = self.provider.endpoint_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("azure_openai provider {} missing endpoint_url", self.provider.name)
                })?;
                let client = azure::Client::builder(self.api_key.clone(), endpoint).build()?;
                let mut builder = client.agent(&model);
                if !system.is_empty() {
                    builder = builder.preamble(&system);
                }
                if let Some(temp) = opts.temperature {
                    builder = builder.temperature(temp);
                }
                if let Some(value) = extra {
                    builder = builder.additional_params(value);
                }
                let agent = builder.build();
                Ok(agent.prompt(input.as_str()).await?)
            }
            ProviderType::Groq => {
                let client = groq::Client::new(&self.api_key);
                let mut builder = client.agent(&model);
                if !system.is_empty() {
                    builder = builder.preamble(&system);
                }
                if let Some(temp) = opts.temperature {
                    builder = builder.temperature(temp);
                }
                if let Some(value) = extra {
                    builder = builder.additional_params(value);
                }
                let agent = builder.build();
                Ok(agent.prompt(input.as_str()).await?)
            }
        }
    }

    /// Issues a 5-token probe to confirm the stored credential still works.
    pub async fn validate_credentials(&self) -> (bool, Option<String>) {
        let probe = vec![ChatMessage::user("ping")];
        let opts = ChatOptions { max_tokens: Some(5), ..Default::default() };
        match self.chat_once(&probe, &opts).await {
            Ok(_) => (true, None),
            Err(err) => (false, Some(err.to_string())),
        }
    }
}

fn split_preamble(messages: &[ChatMessage]) -> anyhow::Result<(String, String)> {
    let system = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let input = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if input.is_empty() {
        anyhow::bail!("chat requires at least one non-system message");
    }
    Ok((system, input))
}

fn json_mode_params(json_mode: bool) -> Option<serde_json::Value> {
    json_mode.then(|| serde_json::json!({"response_format": {"type": "json_object"}}))
}
