//! sentiwiz-core library interface
//!
//! The orchestration core of the Sentiwiz wizard: tabular file ingestion,
//! local inference runtime management, the per-row classification
//! pipeline, and the wizard stage sequencer. A front end (GUI or the
//! bundled CLI) observes published state through the shared EventBus and
//! never mutates it directly.

pub mod export;
pub mod models;
pub mod services;

pub use models::analysis::{AnalysisItem, AnalysisResult, PipelineRun};
pub use models::dataset::ColumnarDataset;
pub use models::installation::{InstallationState, ModelDownload};
pub use services::flow::FlowController;
pub use services::ollama::OllamaClient;
pub use services::pipeline::ClassificationPipeline;
pub use services::runtime::RuntimeManager;
pub use services::tabular::TabularReader;
