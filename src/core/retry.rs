use std::future::Future;
use std::time::Duration;

use crate::core::chat_client::Completion;
use crate::core::error::ChatError;

/// Bounded retry with exponential backoff for a single logical model call.
/// A "successful" result with no generated text is treated as a failure and
/// retried; cancellation is never retried.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional spread applied to each delay (0.10 means ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            jitter: 0.10,
        }
    }
}

/// Uniform sample in [0, 1).
fn jitter_unit() -> f64 {
    match getrandom::u64() {
        Ok(bits) => (bits >> 11) as f64 / (1u64 << 53) as f64,
        Err(_) => 0.5,
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): doubled each
    /// retry, jittered, never above the ceiling.
    fn delay_after(&self, attempt: u32) -> Duration {
        let doubling = 1u32 << (attempt - 1).min(16);
        let nominal = self
            .base_delay
            .saturating_mul(doubling)
            .min(self.max_delay);
        let spread = 1.0 + self.jitter * (jitter_unit() * 2.0 - 1.0);
        nominal.mul_f64(spread.max(0.0)).min(self.max_delay)
    }

    pub async fn run<F, Fut>(
        &self,
        model_label: &str,
        mut operation: F,
    ) -> Result<Completion, ChatError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Completion, ChatError>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(completion) if completion.text.trim().is_empty() => {
                    last_error = ChatError::EmptyResponse {
                        model: model_label.to_string(),
                    }
                    .to_string();
                    tracing::debug!(model = model_label, attempt, "empty response");
                }
                Ok(completion) => return Ok(completion),
                Err(ChatError::Cancelled) => return Err(ChatError::Cancelled),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    last_error = err.to_string();
                    tracing::debug!(model = model_label, attempt, error = %last_error, "attempt failed");
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay_after(attempt)).await;
            }
        }
        Err(ChatError::ExhaustedRetries {
            model: model_label.to_string(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            raw: json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_gets_exactly_three_attempts() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result = policy
            .run("vendor/model", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<Completion, _>(ChatError::transport("502")) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(ChatError::ExhaustedRetries { model, last_error }) => {
                assert_eq!(model, "vendor/model");
                assert!(last_error.contains("502"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_success_skips_the_third() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result = policy
            .run("vendor/model", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(ChatError::transport("503"))
                    } else {
                        Ok(completion("recovered"))
                    }
                }
            })
            .await
            .expect("second attempt succeeds");
        assert_eq!(result.text, "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_are_rejected_and_retried() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result = policy
            .run("vendor/model", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Ok(completion("   "))
                    } else {
                        Ok(completion("real text"))
                    }
                }
            })
            .await
            .expect("non-empty attempt succeeds");
        assert_eq!(result.text, "real text");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_propagated_without_retry() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result = policy
            .run("vendor/model", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<Completion, _>(ChatError::Cancelled) }
            })
            .await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        let stamps = Mutex::new(Vec::new());
        let _ = policy
            .run("vendor/model", || {
                stamps.lock().unwrap().push(Instant::now());
                async { Err::<Completion, _>(ChatError::transport("502")) }
            })
            .await;

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 3);
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first >= Duration::from_millis(900), "first delay {first:?}");
        assert!(first <= Duration::from_millis(1100), "first delay {first:?}");
        assert!(second >= Duration::from_millis(1800), "second delay {second:?}");
        assert!(second <= Duration::from_millis(2200), "second delay {second:?}");
        assert!(second >= first);
    }

    #[test]
    fn delays_never_exceed_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };
        for attempt in 1..10 {
            assert!(policy.delay_after(attempt) <= policy.max_delay);
        }
    }
}
