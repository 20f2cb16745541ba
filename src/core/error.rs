use std::error::Error as StdError;
use std::fmt;

/// A single model's contribution to a round-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub model: String,
    pub error: String,
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// Errors raised by model calls and aggregation rounds.
#[derive(Debug)]
pub enum ChatError {
    /// Non-success HTTP status or a broken connection to the provider.
    Transport { message: String },

    /// Success status but no usable generated text. Folded into the retry
    /// policy's "reject empty result" rule.
    EmptyResponse { model: String },

    /// Caller-initiated abort. Never retried, always propagated as-is.
    Cancelled,

    /// The retry budget for one model was spent.
    ExhaustedRetries { model: String, last_error: String },

    /// Every contributing model failed; the round produced nothing.
    AllModelsFailed { failures: Vec<ModelFailure> },

    /// The transcript's durable write failed.
    Storage { message: String },
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            message: message.into(),
        }
    }

    /// Retryable errors may succeed on a fresh attempt; terminal ones are
    /// surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Transport { .. } | ChatError::EmptyResponse { .. }
        )
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Transport { message } => write!(f, "API request failed: {message}"),
            ChatError::EmptyResponse { model } => {
                write!(f, "Empty response from {model}")
            }
            ChatError::Cancelled => write!(f, "Request cancelled"),
            ChatError::ExhaustedRetries { model, last_error } => {
                write!(f, "All retries exhausted for {model}: {last_error}")
            }
            ChatError::AllModelsFailed { failures } => {
                write!(f, "All models failed")?;
                for failure in failures {
                    write!(f, "\n  {failure}")?;
                }
                Ok(())
            }
            ChatError::Storage { message } => {
                write!(f, "Failed to persist transcript: {message}")
            }
        }
    }
}

impl StdError for ChatError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_empty_are_retryable() {
        assert!(ChatError::transport("502").is_retryable());
        assert!(ChatError::EmptyResponse {
            model: "m".into()
        }
        .is_retryable());
    }

    #[test]
    fn cancellation_and_exhaustion_are_terminal() {
        assert!(!ChatError::Cancelled.is_retryable());
        assert!(!ChatError::ExhaustedRetries {
            model: "m".into(),
            last_error: "502".into()
        }
        .is_retryable());
    }

    #[test]
    fn all_models_failed_lists_each_contributor() {
        let err = ChatError::AllModelsFailed {
            failures: vec![
                ModelFailure {
                    model: "a/one".into(),
                    error: "timeout".into(),
                },
                ModelFailure {
                    model: "b/two".into(),
                    error: "503".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("a/one: timeout"));
        assert!(text.contains("b/two: 503"));
    }
}
