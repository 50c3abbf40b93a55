//! Core services

pub mod flow;
pub mod ollama;
pub mod pipeline;
pub mod runtime;
pub mod tabular;
