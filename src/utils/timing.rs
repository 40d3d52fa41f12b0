use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

const TIMER_TEXT_LIMIT: usize = 300;

#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: i64,
    user_id: i64,
    text: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    completed: bool,
}

impl CommandTimer {
    pub fn new(command: &str, chat_id: i64, user_id: i64, text: Option<&str>) -> Self {
        let text = text.map(|value| {
            value
                .replace('\n', " ")
                .chars()
                .take(TIMER_TEXT_LIMIT)
                .collect::<String>()
        });
        CommandTimer {
            command: command.to_string(),
            chat_id,
            user_id,
            text,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            completed: false,
        }
    }

    pub fn complete(&mut self, status: &str, detail: Option<&str>) {
        if self.completed {
            return;
        }
        self.completed = true;
        info!(
            target: TIMING_TARGET,
            "event=command_completed command={} chat_id={} user_id={} started_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.started_at.to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            status,
            detail.unwrap_or_default()
        );
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        self.complete("dropped", None);
    }
}

pub fn start_command_timer(
    command: &str,
    chat_id: i64,
    user_id: i64,
    text: Option<&str>,
) -> CommandTimer {
    let timer = CommandTimer::new(command, chat_id, user_id, text);
    info!(
        target: TIMING_TARGET,
        "event=command_received command={} chat_id={} user_id={} received_at={} text={:?}",
        timer.command,
        timer.chat_id,
        timer.user_id,
        timer.started_at.to_rfc3339(),
        timer.text
    );
    timer
}

/// Wraps one provider call with request/response timing records.
pub async fn log_provider_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: TIMING_TARGET,
        "event=provider_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: TIMING_TARGET,
        "event=provider_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status,
        metadata_text
    );

    result
}
