use crate::cache::{experiment_cancel_key, experiment_progress_key, SharedKvStore};
use crate::config::AppConfig;
use crate::engine::context::ExperimentContext;
use crate::engine::judge::JudgeRequest;
use crate::engine::{executor, generator, judge, planner, sampler, scorer};
use crate::error::AppError;
use crate::llm::LlmGateway;
use crate::models::{ConversationTurn, ExperimentStatus, ExperimentResult, TestCase};
use crate::security::SecretVault;
use crate::storage::Storage;
use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const BATCH_SIZE: usize = 5;
const INTER_REQUEST_DELAY: Duration = Duration::from_secs(1);
const ERROR_THRESHOLD_WINDOW: usize = 50;
const ERROR_THRESHOLD_RATE: f64 = 0.60;

/// Runs the full experiment lifecycle (spec §4.10): load context, probe
/// credentials, plan, generate, execute+judge in batches with progress/
/// cancellation/circuit-breaker checks, sample, score, persist. Partial
/// results are always flushed, so a failed or cancelled run still leaves
/// a usable analytics snapshot over whatever completed.
pub async fn run_experiment(
    storage: &Storage,
    kv: &SharedKvStore,
    vault: &SecretVault,
    http: &reqwest::Client,
    config: &AppConfig,
    experiment_id: uuid::Uuid,
) -> anyhow::Result<()> {
    let Some(mut experiment) = storage.experiments.get(experiment_id)? else {
        anyhow::bail!("experiment {experiment_id} not found");
    };
    let Some(project) = storage.projects.get(experiment.project_id)? else {
        anyhow::bail!("project {} not found", experiment.project_id);
    };
    let Some(provider) = storage.providers.get(experiment.provider_id)? else {
        anyhow::bail!("provider {} not found", experiment.provider_id);
    };

    experiment.status = ExperimentStatus::Running;
    experiment.started_at = Some(Utc::now());
    storage.experiments.update(&experiment)?;
    kv.set_ex(&experiment_progress_key(experiment_id), "0/0", Duration::from_secs(3600)).await.ok();

    let gateway = match LlmGateway::new(provider.clone(), vault, provider.model.clone().unwrap_or_default()) {
        Ok(gateway) => gateway,
        Err(err) => return fail(storage, &mut experiment, err.to_string()),
    };
    let (ok, reason) = gateway.validate_credentials().await;
    if !ok {
        return fail(storage, &mut experiment, reason.unwrap_or_else(|| "credential probe failed".to_string()));
    }

    let ctx = ExperimentContext { experiment: experiment.clone(), project, provider };
    let plan = planner::build_plan(ctx.experiment.sub_type, ctx.experiment.testing_level);

    let augmenter = if ctx.experiment.target_config.is_direct() { None } else { Some(&gateway) };
    let test_cases = generator::generate_test_cases(&ctx, &plan, augmenter).await;
    if test_cases.is_empty() {
        return fail(storage, &mut experiment, "generator produced no test cases".to_string());
    }

    experiment.progress_total = test_cases.len() as u32;
    storage.experiments.update(&experiment)?;
    storage.test_cases.insert_batch(&test_cases)?;

    let direct_gateway = ctx.experiment.target_config.is_direct().then_some(&gateway);
    let thread_id = if ctx.experiment.turn_mode == crate::models::TurnMode::MultiTurn {
        executor::init_thread(&ctx.experiment.target_config, http, vault).await.ok()
    } else {
        None
    };

    let mut completed = 0u32;
    let mut error_window: Vec<bool> = Vec::with_capacity(ERROR_THRESHOLD_WINDOW);
    let mut terminal: Option<ExperimentStatus> = None;

    'batches: for batch in test_cases.chunks(BATCH_SIZE) {
        for test_case in batch {
            sleep(INTER_REQUEST_DELAY).await;

            let (response_text, conversation, latency_ms, is_error) = if let Some(turns) = &test_case.conversation_plan {
                match execute_conversation(&ctx, direct_gateway, http, vault, config, turns, thread_id.as_deref()).await {
                    Ok((response_text, conversation, latency_ms)) => {
                        let is_error = response_text.is_none();
                        (response_text, Some(conversation), Some(latency_ms), is_error)
                    }
                    Err(err) if err.downcast_ref::<AppError>().is_some_and(is_rate_limit_exceeded) => {
                        terminal = Some(ExperimentStatus::Failed);
                        experiment.error_message = Some(format!("rate limit exceeded: {err}"));
                        break 'batches;
                    }
                    Err(err) => {
                        warn!(test_case_id = %test_case.id, error = %err, "target execution failed");
                        (None, None, None, true)
                    }
                }
            } else {
                let outcome = executor::execute_prompt(
                    &ctx.experiment.target_config,
                    direct_gateway,
                    http,
                    vault,
                    &test_case.prompt,
                    thread_id.as_deref(),
                    config.experiment_max_retries,
                    config.experiment_retry_delay_secs as f64,
                )
                .await;

                match outcome {
                    Ok(response) => (response.text.clone(), None, Some(response.latency_ms), response.text.is_none()),
                    Err(err) if err.downcast_ref::<AppError>().is_some_and(is_rate_limit_exceeded) => {
                        terminal = Some(ExperimentStatus::Failed);
                        experiment.error_message = Some(format!("rate limit exceeded: {err}"));
                        break 'batches;
                    }
                    Err(err) => {
                        warn!(test_case_id = %test_case.id, error = %err, "target execution failed");
                        (None, None, None, true)
                    }
                }
            };

            let mut updated = test_case.clone();
            updated.response = response_text.clone();
            updated.conversation = conversation.clone();
            updated.latency_ms = latency_ms;
            storage.test_cases.update(&updated)?;

            sleep(INTER_REQUEST_DELAY).await;
            let result = if let Some(text) = &response_text {
                let request = JudgeRequest {
                    test_case_id: test_case.id,
                    risk_category: &test_case.risk_category,
                    expected_behaviour: test_case.expected_behaviour.as_deref(),
                    prompt: &test_case.prompt,
                    response: text,
                    conversation: conversation.as_deref(),
                };
                match judge::judge_response(&gateway, &ctx, request).await {
                    Ok(result) => result,
                    Err(err) => error_result(test_case.id, err.to_string()),
                }
            } else {
                error_result(test_case.id, "target execution failed".to_string())
            };
            error_window.push(is_error || result.result == crate::models::ResultStatus::Error);
            if error_window.len() > ERROR_THRESHOLD_WINDOW {
                error_window.remove(0);
            }

            storage.results.insert(&result)?;
            completed += 1;
        }

        experiment.progress_completed = completed;
        storage.experiments.update(&experiment)?;
        kv.set_ex(
            &experiment_progress_key(experiment_id),
            &format!("{completed}/{}", test_cases.len()),
            Duration::from_secs(3600),
        )
        .await
        .ok();

        if kv.get(&experiment_cancel_key(experiment_id)).await.ok().flatten().is_some() {
            terminal = Some(ExperimentStatus::Cancelled);
            break;
        }

        if error_window.len() == ERROR_THRESHOLD_WINDOW {
            let error_rate = error_window.iter().filter(|e| **e).count() as f64 / ERROR_THRESHOLD_WINDOW as f64;
            if error_rate >= ERROR_THRESHOLD_RATE {
                terminal = Some(ExperimentStatus::Failed);
                experiment.error_message = Some(format!("circuit breaker tripped: {:.0}% error rate", error_rate * 100.0));
                break;
            }
        }
    }

    let persisted_results: Vec<ExperimentResult> = storage
        .test_cases
        .list_by_experiment(experiment_id)?
        .iter()
        .filter_map(|tc| storage.results.get_by_test_case(tc.id).ok().flatten())
        .collect();
    let persisted_cases: Vec<TestCase> = storage.test_cases.list_by_experiment(experiment_id)?;

    let representative_ids =
        sampler::select_representatives(&persisted_cases, &persisted_results, ctx.experiment.testing_level);
    storage.test_cases.mark_representatives(&representative_ids)?;

    let mut analytics = scorer::score(&persisted_cases, &persisted_results);
    if analytics.total >= 10 {
        analytics.insights = scorer::narrative_insights(&gateway, &analytics).await;
    }
    experiment.analytics = Some(serde_json::to_value(&analytics)?);

    experiment.status = terminal.unwrap_or(ExperimentStatus::Completed);
    experiment.completed_at = Some(Utc::now());
    storage.experiments.update(&experiment)?;
    kv.delete(&experiment_progress_key(experiment_id)).await.ok();
    kv.delete(&experiment_cancel_key(experiment_id)).await.ok();

    info!(experiment_id = %experiment_id, status = ?experiment.status, total = analytics.total, "experiment finished");
    Ok(())
}

fn is_rate_limit_exceeded(err: &AppError) -> bool {
    matches!(err, AppError::RateLimitExceeded(_))
}

/// Drives one planned multi-turn conversation to completion (spec §4.5):
/// each turn is sent against the shared `thread_id`, accumulating a
/// role-tagged transcript. Stops early and returns `None` as the response
/// text if any turn fails to produce a reply, but the partial transcript
/// up to that point is still returned so it can be persisted. Propagates
/// `AppError::RateLimitExceeded` so the caller can treat it as fatal.
async fn execute_conversation(
    ctx: &ExperimentContext,
    direct_gateway: Option<&LlmGateway>,
    http: &reqwest::Client,
    vault: &SecretVault,
    config: &AppConfig,
    turns: &[String],
    thread_id: Option<&str>,
) -> anyhow::Result<(Option<String>, Vec<ConversationTurn>, u64)> {
    let mut transcript = Vec::with_capacity(turns.len() * 2);
    let mut last_response = None;
    let mut total_latency = 0u64;

    for turn in turns {
        transcript.push(ConversationTurn { role: "user".to_string(), content: turn.clone() });
        let outcome = executor::execute_prompt(
            &ctx.experiment.target_config,
            direct_gateway,
            http,
            vault,
            turn,
            thread_id,
            config.experiment_max_retries,
            config.experiment_retry_delay_secs as f64,
        )
        .await?;
        total_latency += outcome.latency_ms;

        let Some(text) = outcome.text else {
            last_response = None;
            break;
        };
        transcript.push(ConversationTurn { role: "assistant".to_string(), content: text.clone() });
        last_response = Some(text);
    }

    Ok((last_response, transcript, total_latency))
}

fn fail(storage: &Storage, experiment: &mut crate::models::Experiment, reason: String) -> anyhow::Result<()> {
    experiment.status = ExperimentStatus::Failed;
    experiment.error_message = Some(reason);
    experiment.completed_at = Some(Utc::now());
    storage.experiments.update(experiment)?;
    Ok(())
}

fn error_result(test_case_id: uuid::Uuid, explanation: String) -> ExperimentResult {
    ExperimentResult {
        id: uuid::Uuid::new_v4(),
        test_case_id,
        result: crate::models::ResultStatus::Error,
        severity: None,
        confidence: None,
        explanation: Some(explanation),
        owasp_mapping: None,
    }
}
