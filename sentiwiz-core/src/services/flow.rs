//! Wizard stage sequencer
//!
//! A strict linear state machine over the wizard stages. It owns no
//! business logic: readiness is passed in by the caller at the one
//! transition that depends on it, and analysis in-flight status is
//! deliberately not its concern (the front end disables back/forward
//! triggers during analysis).

use chrono::Utc;
use sentiwiz_common::events::{EventBus, WizardEvent, WizardStage};

/// Wizard stage controller
pub struct FlowController {
    stage: WizardStage,
    events: EventBus,
}

impl FlowController {
    pub fn new(events: EventBus) -> Self {
        Self {
            stage: WizardStage::Welcome,
            events,
        }
    }

    /// Current stage
    pub fn stage(&self) -> WizardStage {
        self.stage
    }

    /// Move forward exactly one stage
    ///
    /// The single conditional skip: leaving Welcome bypasses
    /// RuntimeSetup entirely when the runtime is already ready.
    /// Advancing from the final stage is a no-op.
    pub fn advance(&mut self, runtime_ready: bool) -> WizardStage {
        use WizardStage::*;

        let next = match self.stage {
            Welcome => {
                if runtime_ready {
                    ModelSelection
                } else {
                    RuntimeSetup
                }
            }
            RuntimeSetup => ModelSelection,
            ModelSelection => FileImport,
            FileImport => ColumnSelection,
            ColumnSelection => AnalysisProgress,
            AnalysisProgress => ResultsSummary,
            ResultsSummary => ResultsSummary,
        };
        self.transition_to(next)
    }

    /// Move backward where permitted
    ///
    /// Back from ModelSelection always returns to Welcome, bypassing
    /// RuntimeSetup regardless of how ModelSelection was reached. All
    /// other stages ignore back.
    pub fn back(&mut self) -> WizardStage {
        use WizardStage::*;

        let prev = match self.stage {
            ModelSelection => Welcome,
            FileImport => ModelSelection,
            ColumnSelection => FileImport,
            _ => self.stage,
        };
        self.transition_to(prev)
    }

    /// Return unconditionally to Welcome
    ///
    /// Clearing reader/pipeline state is the responsibility of their
    /// owners, triggered by the same observer that drives this call.
    pub fn reset(&mut self) -> WizardStage {
        self.transition_to(WizardStage::Welcome)
    }

    fn transition_to(&mut self, next: WizardStage) -> WizardStage {
        if next != self.stage {
            let old_stage = self.stage;
            self.stage = next;
            let _ = self.events.emit(WizardEvent::StageChanged {
                old_stage,
                new_stage: next,
                timestamp: Utc::now(),
            });
        }
        self.stage
    }
}
