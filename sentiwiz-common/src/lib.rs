//! Shared types for Sentiwiz modules
//!
//! Provides the common error type, the wizard event bus, and preference
//! persistence used by the core and by any front end embedding it.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
