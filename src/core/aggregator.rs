use std::cell::Cell;
use std::future::Future;

use futures_util::future::{join_all, select_all};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commands::Strategy;
use crate::core::chat_client::{ModelEndpoint, PartialUpdate};
use crate::core::error::{ChatError, ModelFailure};
use crate::core::message::{ConversationTurn, MessageId};
use crate::core::retry::RetryPolicy;
use crate::core::transcript::TranscriptStore;

/// What "first to settle" means for the race strategy.
///
/// `FirstSettled` observes only the first call to finish, success or
/// failure: if the fastest model fails while a slower one would have
/// succeeded, the round fails. `FirstSuccess` keeps racing the remaining
/// calls until one succeeds, failing only when all have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RacePolicy {
    #[default]
    FirstSettled,
    FirstSuccess,
}

impl RacePolicy {
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "first-settled" => Some(RacePolicy::FirstSettled),
            "first-success" => Some(RacePolicy::FirstSuccess),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RacePolicy::FirstSettled => "first-settled",
            RacePolicy::FirstSuccess => "first-success",
        }
    }
}

/// Lifecycle of one aggregation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Dispatching,
    Streaming,
    Finalizing,
    Committed,
    Failed,
}

/// The sole output of a completed round: the winning or synthesized text
/// and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyResult {
    pub text: String,
    pub contributing_model: String,
}

fn refine_prompt(request: &str, previous: &str) -> String {
    format!(
        "Enhance the previous response to the request below. Keep what is \
         correct, improve clarity and completeness, and reply with the \
         improved response only.\n\nRequest: {request}\n\nPrevious response:\n{previous}"
    )
}

fn synthesis_prompt(request: &str, combined: &str) -> String {
    format!(
        "Several assistants answered the request below. Synthesize their \
         answers into one coherent response, resolving disagreements and \
         removing repetition. Reply with the synthesized response only.\n\n\
         Request: {request}\n\n{combined}"
    )
}

fn apply_update<S: TranscriptStore>(
    store: &mut S,
    placeholder: MessageId,
    update: &PartialUpdate,
    observer: &mut dyn FnMut(&PartialUpdate),
) {
    store.update(placeholder, &update.text, Some(&update.model));
    observer(update);
}

/// Awaits `operation` while funneling partial updates into the shared
/// placeholder. All strategies route placeholder writes through here, so
/// the placeholder has a single writer per round.
async fn drive_streaming<T, S, F>(
    operation: F,
    partials: &mut mpsc::UnboundedReceiver<PartialUpdate>,
    store: &mut S,
    placeholder: MessageId,
    observer: &mut dyn FnMut(&PartialUpdate),
) -> T
where
    S: TranscriptStore,
    F: Future<Output = T>,
{
    tokio::pin!(operation);
    loop {
        tokio::select! {
            Some(update) = partials.recv() => {
                apply_update(store, placeholder, &update, observer);
            }
            outcome = &mut operation => {
                while let Ok(update) = partials.try_recv() {
                    apply_update(store, placeholder, &update, observer);
                }
                return outcome;
            }
        }
    }
}

/// Orchestrates one aggregation round over the selected models: dispatches
/// calls per strategy, streams progress into the single pending
/// placeholder, tolerates per-model failures, and commits exactly one
/// finalized assistant message on success.
pub struct Aggregator<E: ModelEndpoint> {
    endpoint: E,
    retry: RetryPolicy,
    race_policy: RacePolicy,
    phase: Cell<RoundPhase>,
}

impl<E: ModelEndpoint> Aggregator<E> {
    pub fn new(endpoint: E) -> Self {
        Self {
            endpoint,
            retry: RetryPolicy::default(),
            race_policy: RacePolicy::default(),
            phase: Cell::new(RoundPhase::Idle),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_race_policy(mut self, race_policy: RacePolicy) -> Self {
        self.race_policy = race_policy;
        self
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase.get()
    }

    /// Runs one full round: append the user entry, stream into a fresh
    /// placeholder, and either commit the finalized reply or remove the
    /// placeholder and surface an inline error. The transcript never ends a
    /// round with a pending entry.
    pub async fn run_round<S: TranscriptStore>(
        &self,
        store: &mut S,
        strategy: Strategy,
        prompt: &str,
        models: &[String],
        observer: &mut dyn FnMut(&PartialUpdate),
    ) -> Result<StrategyResult, ChatError> {
        if models.is_empty() {
            return Err(ChatError::AllModelsFailed { failures: vec![] });
        }

        self.phase.set(RoundPhase::Dispatching);
        tracing::debug!(strategy = strategy.as_str(), models = models.len(), "dispatching round");

        let history = store.conversation_turns();

        let user_id = store.append_user(prompt);
        if let Err(err) = store.commit(user_id).await {
            store.remove(user_id);
            self.phase.set(RoundPhase::Failed);
            return Err(ChatError::Storage {
                message: err.to_string(),
            });
        }

        let placeholder = store.append_pending();
        self.phase.set(RoundPhase::Streaming);

        let outcome = match strategy {
            Strategy::Race => {
                self.run_race(store, prompt, &history, models, placeholder, observer)
                    .await
            }
            Strategy::Series => {
                self.run_series(store, prompt, &history, models, placeholder, observer)
                    .await
            }
            Strategy::Parallel => {
                self.run_parallel(store, prompt, &history, models, placeholder, observer)
                    .await
            }
        };

        match outcome {
            Ok(result) => {
                self.phase.set(RoundPhase::Finalizing);
                store.update(placeholder, &result.text, Some(&result.contributing_model));
                store.finalize(placeholder);
                if let Err(err) = store.commit(placeholder).await {
                    store.remove(placeholder);
                    let storage_err = ChatError::Storage {
                        message: err.to_string(),
                    };
                    store.append_error(&storage_err.to_string(), None);
                    self.phase.set(RoundPhase::Failed);
                    return Err(storage_err);
                }
                self.phase.set(RoundPhase::Committed);
                tracing::debug!(model = %result.contributing_model, "round committed");
                Ok(result)
            }
            Err(err) => {
                store.remove(placeholder);
                let bubble = store.append_error(&err.to_string(), None);
                if let Err(commit_err) = store.commit(bubble).await {
                    tracing::warn!("failed to persist error bubble: {commit_err}");
                }
                self.phase.set(RoundPhase::Failed);
                Err(err)
            }
        }
    }

    /// First-to-finish: one concurrent retry-wrapped call per model, all
    /// streaming into the same placeholder, so the visible text may switch
    /// models until a call fully completes. Losers are cancelled once the
    /// round is decided.
    async fn run_race<S: TranscriptStore>(
        &self,
        store: &mut S,
        prompt: &str,
        history: &[ConversationTurn],
        models: &[String],
        placeholder: MessageId,
        observer: &mut dyn FnMut(&PartialUpdate),
    ) -> Result<StrategyResult, ChatError> {
        let endpoint = &self.endpoint;
        let retry = &self.retry;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tokens: Vec<CancellationToken> =
            models.iter().map(|_| CancellationToken::new()).collect();

        let mut pending: Vec<_> = models
            .iter()
            .zip(&tokens)
            .map(|(model, token)| {
                let tx = tx.clone();
                let token = token.clone();
                Box::pin(async move {
                    let result = retry
                        .run(model, || {
                            endpoint.invoke(model, prompt, history, Some(tx.clone()), token.clone())
                        })
                        .await;
                    (model.clone(), result)
                })
            })
            .collect();
        drop(tx);

        let mut failures = Vec::new();
        let winner = loop {
            let ((model, result), _index, rest) =
                drive_streaming(select_all(pending), &mut rx, store, placeholder, observer).await;
            match result {
                Ok(completion) => break Some((model, completion)),
                Err(err) => {
                    tracing::warn!(model = %model, "race contender failed: {err}");
                    failures.push(ModelFailure {
                        model,
                        error: err.to_string(),
                    });
                    if self.race_policy == RacePolicy::FirstSettled || rest.is_empty() {
                        break None;
                    }
                    pending = rest;
                }
            }
        };

        for token in &tokens {
            token.cancel();
        }

        match winner {
            Some((model, completion)) => Ok(StrategyResult {
                text: completion.text,
                contributing_model: model,
            }),
            None => Err(ChatError::AllModelsFailed { failures }),
        }
    }

    /// Chain of refinement: strictly sequential, each stage fed the last
    /// successful output. Failed non-final stages are skipped; only the
    /// final stage streams, and its failure fails the round.
    async fn run_series<S: TranscriptStore>(
        &self,
        store: &mut S,
        prompt: &str,
        history: &[ConversationTurn],
        models: &[String],
        placeholder: MessageId,
        observer: &mut dyn FnMut(&PartialUpdate),
    ) -> Result<StrategyResult, ChatError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut failures = Vec::new();
        let mut previous: Option<String> = None;
        let last_index = models.len() - 1;

        for (index, model) in models.iter().enumerate() {
            let stage_prompt = match &previous {
                None => prompt.to_string(),
                Some(text) => refine_prompt(prompt, text),
            };
            let is_last = index == last_index;
            let partials = is_last.then(|| tx.clone());

            let call = self.retry.run(model, || {
                self.endpoint.invoke(
                    model,
                    &stage_prompt,
                    history,
                    partials.clone(),
                    CancellationToken::new(),
                )
            });
            let result = if is_last {
                drive_streaming(call, &mut rx, store, placeholder, observer).await
            } else {
                call.await
            };

            match result {
                Ok(completion) => previous = Some(completion.text),
                Err(err) => {
                    tracing::warn!(model = %model, stage = index, "series stage failed: {err}");
                    failures.push(ModelFailure {
                        model: model.clone(),
                        error: err.to_string(),
                    });
                    if is_last {
                        return Err(ChatError::AllModelsFailed { failures });
                    }
                }
            }
        }

        match previous {
            Some(text) => Ok(StrategyResult {
                text,
                contributing_model: models[last_index].clone(),
            }),
            None => Err(ChatError::AllModelsFailed { failures }),
        }
    }

    /// Fan-out + synthesize: every model called concurrently without
    /// streaming, failures dropped into visible error bubbles, and the
    /// successes synthesized by the first successful model, which streams
    /// into the placeholder.
    async fn run_parallel<S: TranscriptStore>(
        &self,
        store: &mut S,
        prompt: &str,
        history: &[ConversationTurn],
        models: &[String],
        placeholder: MessageId,
        observer: &mut dyn FnMut(&PartialUpdate),
    ) -> Result<StrategyResult, ChatError> {
        let endpoint = &self.endpoint;
        let retry = &self.retry;

        let results = join_all(models.iter().map(|model| async move {
            let result = retry
                .run(model, || {
                    endpoint.invoke(model, prompt, history, None, CancellationToken::new())
                })
                .await;
            (model.clone(), result)
        }))
        .await;

        let mut successes: Vec<(String, String)> = Vec::new();
        let mut failures = Vec::new();
        for (model, result) in results {
            match result {
                Ok(completion) => successes.push((model, completion.text)),
                Err(err) => {
                    let bubble = store.append_error(&format!("{model}: {err}"), Some(&model));
                    if let Err(commit_err) = store.commit(bubble).await {
                        tracing::warn!("failed to persist error bubble: {commit_err}");
                    }
                    failures.push(ModelFailure {
                        model,
                        error: err.to_string(),
                    });
                }
            }
        }

        if successes.is_empty() {
            return Err(ChatError::AllModelsFailed { failures });
        }

        let combined = successes
            .iter()
            .map(|(model, text)| format!("[{model}]\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let synth_model = successes[0].0.clone();
        let synth_prompt = synthesis_prompt(prompt, &combined);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let call = retry.run(&synth_model, || {
            endpoint.invoke(
                &synth_model,
                &synth_prompt,
                history,
                Some(tx.clone()),
                CancellationToken::new(),
            )
        });
        let completion = drive_streaming(call, &mut rx, store, placeholder, observer).await?;

        Ok(StrategyResult {
            text: completion.text,
            contributing_model: synth_model,
        })
    }
}
