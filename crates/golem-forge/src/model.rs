//! The model interface the runtime consumes.
//!
//! Platform model factories (API-key acquisition, provider SDK glue) live
//! outside the core; they hand the runtime an object implementing
//! [`ModelProvider`] — a single `generate` operation taking the full
//! message list plus tool definitions and returning text, tool calls, and
//! token usage. Provider exceptions surface as run failures.
//!
//! A [`RetryPolicy`] can repeat a failed `generate` on an explicit delay
//! ladder when the failure looks like capacity or connectivity rather
//! than a caller mistake. The default policy never retries.

use crate::{Message, ToolCall, ToolDef, UsageInfo};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::warn;

// ── Contract ───────────────────────────────────────────────────────

/// A generation request: the resolved model id, the full message list,
/// and the LLM-visible tool definitions.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
}

/// A generation response.
#[derive(Clone, Debug, Default)]
pub struct GenerateResponse {
    /// Assistant text, if any.
    pub text: Option<String>,
    /// Tool calls requested this turn, in model order.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this call.
    pub usage: UsageInfo,
}

/// Boxed future returned by [`ModelProvider::generate`].
///
/// Type alias to keep the trait dyn-compatible.
pub type GenerateFuture<'a> = BoxFuture<'a, Result<GenerateResponse, String>>;

/// The single operation the core requires from a model backend.
pub trait ModelProvider: Send + Sync {
    fn generate(&self, request: GenerateRequest) -> GenerateFuture<'_>;
}

// ── Retry ──────────────────────────────────────────────────────────

/// Retry schedule for transient `generate` failures.
///
/// A policy is the explicit list of waits between attempts, fixed at
/// construction — a run's retry timing is fully deterministic and shows
/// up as-is in logs. The default (empty) policy makes the first failure
/// final.
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// `retries` waits starting at `first`, each double the previous,
    /// clamped to `cap`.
    pub fn doubling(retries: u32, first: Duration, cap: Duration) -> Self {
        let mut delays = Vec::with_capacity(retries as usize);
        let mut next = first;
        for _ in 0..retries {
            delays.push(next.min(cap));
            next = next.saturating_mul(2);
        }
        Self { delays }
    }

    /// A doubling ladder with the defaults used for model calls:
    /// first wait 400ms, capped at 10s.
    pub fn attempts(retries: u32) -> Self {
        Self::doubling(retries, Duration::from_millis(400), Duration::from_secs(10))
    }

    /// How many retries follow the first attempt.
    pub fn retries(&self) -> usize {
        self.delays.len()
    }

    /// Drive `op` until it succeeds, the ladder runs out, or the error
    /// is not worth repeating.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let mut outcome = op().await;
        for (used, delay) in self.delays.iter().enumerate() {
            match outcome {
                Ok(value) => return Ok(value),
                Err(ref error) if !is_retryable_model_error(error) => break,
                Err(ref error) => {
                    warn!(
                        "model call failed, retry {}/{} in {delay:?}: {error}",
                        used + 1,
                        self.delays.len(),
                    );
                }
            }
            tokio::time::sleep(*delay).await;
            outcome = op().await;
        }
        outcome
    }
}

/// Whether a failed generate call is worth repeating.
///
/// Caller mistakes (auth, malformed requests, unknown models) are final.
/// With an HTTP-ish status in the message, the status decides; otherwise
/// capacity and connectivity wording does.
pub fn is_retryable_model_error(error: &str) -> bool {
    let lower = error.to_lowercase();

    let final_markers = [
        "unauthorized",
        "forbidden",
        "invalid",
        "bad request",
        "not found",
        "unprocessable",
    ];
    if final_markers.iter().any(|m| lower.contains(m)) {
        return false;
    }

    if let Some(status) = embedded_status_code(&lower) {
        return status == 408 || status == 429 || status >= 500;
    }

    let transient_markers = [
        "overloaded",
        "timed out",
        "timeout",
        "unavailable",
        "connection",
        "reset by peer",
    ];
    transient_markers.iter().any(|m| lower.contains(m))
}

/// Pull a three-digit status code out of an error string, accepting the
/// common `http 503` / `status 429` phrasings.
fn embedded_status_code(lower: &str) -> Option<u16> {
    for marker in ["http ", "status "] {
        if let Some(idx) = lower.find(marker)
            && let Some(tail) = lower.get(idx + marker.len()..)
        {
            let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
            if digits.len() == 3 {
                return digits.parse().ok();
            }
        }
    }
    None
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_policy_has_no_retries() {
        assert_eq!(RetryPolicy::none().retries(), 0);
        assert_eq!(RetryPolicy::default().retries(), 0);
    }

    #[test]
    fn doubling_ladder_doubles_and_clamps() {
        let policy = RetryPolicy::doubling(
            4,
            Duration::from_millis(100),
            Duration::from_millis(300),
        );
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn attempts_uses_model_call_defaults() {
        let policy = RetryPolicy::attempts(3);
        assert_eq!(policy.retries(), 3);
        assert_eq!(policy.delays[0], Duration::from_millis(400));
        assert_eq!(policy.delays[2], Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn run_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::doubling(
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
        );

        let result = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("model overloaded".to_string())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_stops_on_final_errors() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::attempts(5);

        let result: Result<u32, String> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("HTTP 401 unauthorized".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_policy_never_repeats() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = RetryPolicy::none()
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("model overloaded".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_ladder_returns_last_error() {
        let policy = RetryPolicy::doubling(
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("connection reset by peer".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "connection reset by peer");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn status_codes_decide_when_present() {
        assert!(is_retryable_model_error("provider HTTP 503: try later"));
        assert!(is_retryable_model_error("HTTP 429 rate limited"));
        assert!(is_retryable_model_error("request timed out after status 408"));
        assert!(!is_retryable_model_error("provider HTTP 400"));
        assert!(!is_retryable_model_error("HTTP 404 no such model"));
    }

    #[test]
    fn final_markers_beat_everything() {
        // "invalid" makes the error final even alongside a 5xx status.
        assert!(!is_retryable_model_error("HTTP 500: invalid request body"));
        assert!(!is_retryable_model_error("unauthorized"));
    }

    #[test]
    fn connectivity_wording_is_retryable() {
        assert!(is_retryable_model_error("model overloaded"));
        assert!(is_retryable_model_error("connection refused"));
        assert!(is_retryable_model_error("service temporarily unavailable"));
        assert!(!is_retryable_model_error("some other failure"));
    }

    #[test]
    fn generate_response_default_is_empty() {
        let resp = GenerateResponse::default();
        assert!(resp.text.is_none());
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.total(), 0);
    }
}
