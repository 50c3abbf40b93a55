//! Classification pipeline
//!
//! Consumes an ordered list of text items and classifies them one at a
//! time against the generation API, publishing each result as it lands.
//! Exactly one request is ever in flight per run; results are published
//! strictly in input order. Starting a new run supersedes the previous
//! one: the old run is cancelled and awaited to completion before the
//! new one begins, so stale results can never interleave with a new
//! run's output.
//!
//! Per-item failures are absorbed, not surfaced: a network fault, a
//! malformed reply, or a reply matching no keyword all map to
//! [`Sentiment::Neutral`]. Robustness to model flakiness comes from this
//! default rather than from retries.

use crate::models::analysis::{AnalysisItem, AnalysisResult, PipelineRun};
use crate::services::ollama::GenerateBackend;
use chrono::Utc;
use sentiwiz_common::events::{EventBus, PipelineStatus, Sentiment, WizardEvent};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Keyword priority for classifying model replies: the first keyword in
/// this list contained anywhere in the reply wins, regardless of where
/// it occurs in the text. No match means neutral.
const KEYWORD_PRIORITY: &[(&str, Sentiment)] = &[
    ("positive", Sentiment::Positive),
    ("negative", Sentiment::Negative),
    ("mixed", Sentiment::Mixed),
];

struct ActiveRun {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Sequential-with-cancellation classification pipeline
pub struct ClassificationPipeline {
    backend: Arc<dyn GenerateBackend>,
    events: EventBus,
    run: Arc<RwLock<PipelineRun>>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl ClassificationPipeline {
    pub fn new(backend: Arc<dyn GenerateBackend>, events: EventBus) -> Self {
        Self {
            backend,
            events,
            run: Arc::new(RwLock::new(PipelineRun::idle())),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Snapshot of the published run state
    pub fn snapshot(&self) -> PipelineRun {
        self.run.read().expect("run lock poisoned").clone()
    }

    /// Begin a new run, superseding any prior one
    ///
    /// The previous run is cancelled and awaited before the new run's
    /// state is published, guaranteeing at most one request loop at a
    /// time and that no stale result precedes the new run's first.
    pub async fn start(&self, items: Vec<AnalysisItem>, model: String, extra_context: Option<String>) {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            prev.token.cancel();
            let _ = prev.handle.await;
        }

        let new_run = PipelineRun::started(items.clone());
        let run_id = new_run.run_id;
        *self.run.write().expect("run lock poisoned") = new_run;

        let _ = self.events.emit(WizardEvent::AnalysisStarted {
            run_id,
            total: items.len(),
            timestamp: Utc::now(),
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.backend),
            self.events.clone(),
            Arc::clone(&self.run),
            token.clone(),
            run_id,
            items,
            model,
            extra_context,
        ));

        *active = Some(ActiveRun { token, handle });
    }

    /// Cooperatively cancel the active run
    ///
    /// The run stops issuing new requests once its current in-flight
    /// request completes or errors, then settles to `Cancelled`.
    pub async fn cancel(&self) {
        if let Some(active) = self.active.lock().await.as_ref() {
            active.token.cancel();
        }
    }

    /// Cancel any active run and discard all published state
    ///
    /// Safe to call from idle, running, or terminal states; calling it
    /// twice observes the same state as calling it once.
    pub async fn reset(&self) {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            prev.token.cancel();
            let _ = prev.handle.await;
        }

        let idle = PipelineRun::idle();
        let run_id = idle.run_id;
        *self.run.write().expect("run lock poisoned") = idle;

        let _ = self.events.emit(WizardEvent::AnalysisStateChanged {
            run_id,
            status: PipelineStatus::Idle,
            timestamp: Utc::now(),
        });
    }
}

/// The per-run request loop, spawned once per `start()`
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    backend: Arc<dyn GenerateBackend>,
    events: EventBus,
    run: Arc<RwLock<PipelineRun>>,
    token: CancellationToken,
    run_id: uuid::Uuid,
    items: Vec<AnalysisItem>,
    model: String,
    extra_context: Option<String>,
) {
    let total = items.len();
    let mut cancelled = false;

    for item in items {
        // Checked before and after the network call to bound
        // cancellation latency to one in-flight request
        if token.is_cancelled() {
            cancelled = true;
            break;
        }

        let sentiment =
            classify_item(backend.as_ref(), &model, &item.text, extra_context.as_deref()).await;

        if token.is_cancelled() {
            cancelled = true;
            break;
        }

        let current = {
            let mut guard = run.write().expect("run lock poisoned");
            if guard.run_id != run_id || guard.status != PipelineStatus::Running {
                return;
            }
            guard.results.push(AnalysisResult {
                index: item.index,
                text: item.text.clone(),
                sentiment,
            });
            guard.results.len()
        };

        let _ = events.emit(WizardEvent::AnalysisResultReady {
            run_id,
            index: item.index,
            sentiment,
            timestamp: Utc::now(),
        });
        let _ = events.emit(WizardEvent::AnalysisProgress {
            run_id,
            current,
            total,
            message: format!("Analyzed {} of {}", current, total),
            timestamp: Utc::now(),
        });
    }

    let status = if cancelled {
        PipelineStatus::Cancelled
    } else {
        PipelineStatus::Completed
    };

    // Terminal publish happens exactly once per run: only the run that
    // still owns the published slot, and only while it is Running, may
    // settle it
    {
        let mut guard = run.write().expect("run lock poisoned");
        if guard.run_id != run_id || guard.status != PipelineStatus::Running {
            return;
        }
        guard.status = status;
    }

    let _ = events.emit(WizardEvent::AnalysisStateChanged {
        run_id,
        status,
        timestamp: Utc::now(),
    });
}

/// Classify one item, absorbing every failure into neutral
async fn classify_item(
    backend: &dyn GenerateBackend,
    model: &str,
    text: &str,
    extra_context: Option<&str>,
) -> Sentiment {
    // Empty comments never trigger a network call
    if text.trim().is_empty() {
        return Sentiment::Neutral;
    }

    let prompt = build_prompt(text, extra_context);
    match backend.generate(model, &prompt).await {
        Ok(reply) => classify_reply(&reply),
        Err(e) => {
            tracing::debug!(error = %e, "Classification request failed, defaulting to neutral");
            Sentiment::Neutral
        }
    }
}

/// Single-turn instruction prompt embedding the raw comment verbatim
fn build_prompt(text: &str, extra_context: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a sentiment analyst. Classify the sentiment of the comment \
         below as exactly one of: positive, negative, mixed, or neutral. \
         Reply with that single word and nothing else.\n\n",
    );
    if let Some(context) = extra_context {
        prompt.push_str("Additional context: ");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Comment: ");
    prompt.push_str(text);
    prompt
}

/// Map a model reply to a sentiment by keyword containment
///
/// The reply is lower-cased and trimmed; [`KEYWORD_PRIORITY`] decides
/// ties when the reply contains several sentiment words.
fn classify_reply(reply: &str) -> Sentiment {
    let reply = reply.to_lowercase();
    let reply = reply.trim();

    for (keyword, sentiment) in KEYWORD_PRIORITY {
        if reply.contains(keyword) {
            return *sentiment;
        }
    }
    Sentiment::Neutral
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_replies_classify_directly() {
        assert_eq!(classify_reply("positive"), Sentiment::Positive);
        assert_eq!(classify_reply("  Negative \n"), Sentiment::Negative);
        assert_eq!(classify_reply("MIXED"), Sentiment::Mixed);
        assert_eq!(classify_reply("neutral"), Sentiment::Neutral);
    }

    #[test]
    fn verbose_replies_match_by_containment() {
        assert_eq!(
            classify_reply("this is clearly Positive feedback"),
            Sentiment::Positive
        );
    }

    #[test]
    fn ties_resolve_by_fixed_priority_not_text_order() {
        // "negative" appears after "mixed" in the text but earlier in
        // the priority list
        assert_eq!(
            classify_reply("mixed feelings here, somewhat negative"),
            Sentiment::Negative
        );
        // "positive" beats everything regardless of position
        assert_eq!(
            classify_reply("mixed, negative, but ultimately positive"),
            Sentiment::Positive
        );
    }

    #[test]
    fn unmatched_replies_default_to_neutral() {
        assert_eq!(classify_reply("I cannot classify this"), Sentiment::Neutral);
        assert_eq!(classify_reply(""), Sentiment::Neutral);
    }

    #[test]
    fn prompt_embeds_comment_verbatim() {
        let prompt = build_prompt("great product, \"love\" it!", None);
        assert!(prompt.contains("Comment: great product, \"love\" it!"));
        assert!(!prompt.contains("Additional context"));
    }

    #[test]
    fn prompt_includes_extra_context_when_present() {
        let prompt = build_prompt("meh", Some("app store reviews"));
        assert!(prompt.contains("Additional context: app store reviews"));
        assert!(prompt.contains("Comment: meh"));
    }
}
