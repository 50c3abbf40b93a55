//! Event types for the Sentiwiz event system
//!
//! Provides the shared event definitions and the EventBus used by all
//! Sentiwiz components. Every piece of published state (installation
//! phase, download progress, pipeline results, wizard stage) announces
//! changes through this one channel; observers never poll shared fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Installation/readiness phase of the local inference runtime
///
/// The runtime manager is the single writer; everything else observes
/// phase changes via [`WizardEvent::InstallPhaseChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    /// Nothing has been requested yet
    Idle,
    /// Probing known install locations for the runtime binary
    Detecting,
    /// A package manager is available; waiting for user consent
    AwaitingUserDecision,
    /// Package-manager install or direct installer download in progress
    Installing,
    /// Installer handed to the OS; polling for the binary to appear
    WaitingForManualInstall,
    /// Spawning the server process and polling its port
    StartingServer,
    /// Querying the model-list API
    CheckingModels,
    /// Terminal success: runtime reachable, health check passed
    Ready,
    /// Terminal failure: see `last_error`
    Failed,
}

/// Terminal and non-terminal states of a model download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Lifecycle status of a classification pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Sentiment classification of a single comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Mixed,
    Neutral,
}

impl Sentiment {
    /// Lowercase keyword form, as matched in model replies and written
    /// to the export file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wizard stages, in forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStage {
    Welcome,
    RuntimeSetup,
    ModelSelection,
    FileImport,
    ColumnSelection,
    AnalysisProgress,
    ResultsSummary,
}

/// Sentiwiz event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for
/// transmission to a front end. All components publish through this
/// central enum so observers get type-safe, exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WizardEvent {
    /// Runtime installation phase changed
    InstallPhaseChanged {
        phase: InstallPhase,
        /// Progress within the phase, 0.0 - 1.0 (reset on phase change)
        progress: f64,
        /// Human-readable status, always set alongside the change
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress update within the current installation phase
    InstallProgress {
        phase: InstallPhase,
        progress: f64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Available model list was refreshed from the runtime
    ModelsRefreshed {
        models: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Bytes arrived on an active model download
    ///
    /// `total` may be unknown, in which case progress is indeterminate.
    ModelDownloadProgress {
        model: String,
        completed: Option<u64>,
        total: Option<u64>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A model download left the running state
    ModelDownloadFinished {
        model: String,
        state: DownloadState,
        timestamp: DateTime<Utc>,
    },

    /// A new pipeline run began
    AnalysisStarted {
        run_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One item was classified; results are published strictly in input order
    AnalysisResultReady {
        run_id: Uuid,
        index: usize,
        sentiment: Sentiment,
        timestamp: DateTime<Utc>,
    },

    /// Per-item progress counter for the active run
    AnalysisProgress {
        run_id: Uuid,
        current: usize,
        total: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The run reached a terminal status (emitted exactly once per run)
    AnalysisStateChanged {
        run_id: Uuid,
        status: PipelineStatus,
        timestamp: DateTime<Utc>,
    },

    /// The wizard moved to a different stage
    StageChanged {
        old_stage: WizardStage,
        new_stage: WizardStage,
        timestamp: DateTime<Utc>,
    },
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WizardEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Old events are dropped for a subscriber that lags more than
    /// `capacity` events behind.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscriber is
    /// listening. Emitting into an empty bus is not a fault; callers
    /// normally ignore the result.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: WizardEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<WizardEvent>> {
        self.tx.send(event)
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
