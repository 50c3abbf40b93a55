//! Runtime installation state
//!
//! Single-writer value objects owned by [`RuntimeManager`]. Observers see
//! them only as snapshots or through EventBus notifications.
//!
//! [`RuntimeManager`]: crate::services::runtime::RuntimeManager

use sentiwiz_common::events::{DownloadState, InstallPhase};
use serde::{Deserialize, Serialize};

/// Published installation/readiness state of the inference runtime
///
/// Invariants maintained by the owning manager:
/// - `phase == Ready` implies `last_error.is_none()` and a passed health
///   check at the time readiness was confirmed
/// - `phase == Failed` implies `last_error.is_some()`
/// - `progress` is monotonic within a phase and resets on phase change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationState {
    /// Current phase of the install/readiness state machine
    pub phase: InstallPhase,
    /// Progress within the phase, 0.0 - 1.0
    pub progress: f64,
    /// Human-readable status, always set alongside phase/progress changes
    pub status_message: String,
    /// Model identifiers known to the runtime, refreshed by explicit query
    pub available_models: Vec<String>,
    /// Terminal error description, cleared on successful phase advance
    pub last_error: Option<String>,
}

impl InstallationState {
    pub fn new() -> Self {
        Self {
            phase: InstallPhase::Idle,
            progress: 0.0,
            status_message: String::new(),
            available_models: Vec::new(),
            last_error: None,
        }
    }

    /// Advance to a new phase, resetting progress and clearing any prior
    /// error (entering `Failed` goes through [`fail`] instead).
    ///
    /// [`fail`]: InstallationState::fail
    pub fn transition(&mut self, phase: InstallPhase, message: impl Into<String>) {
        self.phase = phase;
        self.progress = 0.0;
        self.status_message = message.into();
        self.last_error = None;
    }

    /// Update progress within the current phase
    pub fn set_progress(&mut self, progress: f64, message: impl Into<String>) {
        self.progress = progress.clamp(0.0, 1.0);
        self.status_message = message.into();
    }

    /// Enter the terminal failure phase with a descriptive error
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.phase = InstallPhase::Failed;
        self.progress = 0.0;
        self.status_message = error.clone();
        self.last_error = Some(error);
    }
}

impl Default for InstallationState {
    fn default() -> Self {
        Self::new()
    }
}

/// One active (or terminally recorded) model download
///
/// At most one download runs at a time; starting a new one supersedes
/// the prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDownload {
    /// Model identifier being pulled
    pub model_name: String,
    /// Bytes received so far, when the runtime reports them
    pub bytes_completed: Option<u64>,
    /// Expected total bytes; `None` means indeterminate progress
    pub bytes_total: Option<u64>,
    /// Current state of the download
    pub state: DownloadState,
}

impl ModelDownload {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            bytes_completed: None,
            bytes_total: None,
            state: DownloadState::Running,
        }
    }
}
