//! Lifecycle orchestrator, reconciliation engine and settings.

#[cfg(feature = "lifecycle")]
pub use passgate_lifecycle::*;
