//! Analysis pipeline value objects

use sentiwiz_common::events::{PipelineStatus, Sentiment};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One text cell queued for classification
///
/// `text` is guaranteed non-empty by extraction filtering, but the
/// pipeline still tolerates whitespace-only text defensively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisItem {
    /// Position in the input order; results carry the same index
    pub index: usize,
    /// Raw cell text
    pub text: String,
}

/// Classification outcome for one item
///
/// A failed or ambiguous classification maps to [`Sentiment::Neutral`];
/// the pipeline never surfaces a per-item error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub index: usize,
    pub text: String,
    pub sentiment: Sentiment,
}

/// Published state of one pipeline run
///
/// Owned by [`ClassificationPipeline`]; superseded runs are cancelled,
/// never merged. `results` is always an ordered prefix of `items`: it
/// grows only while `status == Running`, is frozen on `Cancelled`, and
/// equals `items.len()` on `Completed`.
///
/// [`ClassificationPipeline`]: crate::services::pipeline::ClassificationPipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Opaque run identity; changes on every start or reset
    pub run_id: Uuid,
    /// Full ordered input
    pub items: Vec<AnalysisItem>,
    /// Ordered prefix of results matching `items[0..results.len()]`
    pub results: Vec<AnalysisResult>,
    /// Lifecycle status
    pub status: PipelineStatus,
}

impl PipelineRun {
    /// Fresh idle run with no input
    pub fn idle() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            items: Vec::new(),
            results: Vec::new(),
            status: PipelineStatus::Idle,
        }
    }

    /// New running run over `items`
    pub fn started(items: Vec<AnalysisItem>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            items,
            results: Vec::new(),
            status: PipelineStatus::Running,
        }
    }

    /// Fraction of items classified, 0.0 - 1.0
    pub fn progress(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.results.len() as f64 / self.items.len() as f64
    }
}
