use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::RETRY_AFTER;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::rate_limit::RequestBudget;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Accept,
    Retry,
    Fail,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Accept
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Retry
    } else {
        StatusClass::Fail
    }
}

/// OpenDota answers some outages with a 200 and `{"error": "..."}`.
pub fn embedded_server_error(body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    value
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::to_string)
}

/// Sends one logical request, retrying throttled and server-side failures.
///
/// Every attempt consumes a slot from `budget`. Client errors other than
/// 429 are terminal on the first response.
pub fn fetch_text(
    client: &Client,
    label: &str,
    build: impl Fn(&Client) -> RequestBuilder,
    policy: &RetryPolicy,
    budget: &RequestBudget,
) -> Result<String, PipelineError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=attempts {
        budget.acquire();
        let retry_after = match build(client).send() {
            Ok(resp) => match read_response(resp) {
                Ok(body) => return Ok(body),
                Err(AttemptError::Fatal(reason)) => {
                    return Err(PipelineError::fetch_failed(label, reason));
                }
                Err(AttemptError::Transient { reason, retry_after }) => {
                    last_reason = reason;
                    retry_after
                }
            },
            Err(err) => {
                last_reason = format!("request error: {err}");
                None
            }
        };

        if attempt == attempts {
            break;
        }
        let delay = retry_after
            .unwrap_or_else(|| policy.backoff_delay(attempt))
            .min(policy.max_delay);
        warn!(
            target: "fetch",
            %label, attempt, delay_ms = delay.as_millis() as u64, reason = %last_reason,
            "retrying request"
        );
        thread::sleep(delay);
    }

    Err(PipelineError::fetch_failed(
        label,
        format!("gave up after {attempts} attempts: {last_reason}"),
    ))
}

enum AttemptError {
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

fn read_response(resp: Response) -> Result<String, AttemptError> {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    match classify_status(status) {
        StatusClass::Accept => {}
        StatusClass::Retry => {
            return Err(AttemptError::Transient {
                reason: format!("http {status}"),
                retry_after,
            });
        }
        StatusClass::Fail => {
            let body = resp.text().unwrap_or_default();
            return Err(AttemptError::Fatal(format!(
                "http {status}: {}",
                truncate(&body, 160)
            )));
        }
    }

    let body = resp.text().map_err(|err| AttemptError::Transient {
        reason: format!("failed reading body: {err}"),
        retry_after: None,
    })?;
    if let Some(message) = embedded_server_error(&body) {
        debug!(target: "fetch", %message, "server reported error in body");
        return Err(AttemptError::Transient {
            reason: format!("server error: {message}"),
            retry_after: None,
        });
    }
    Ok(body)
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
