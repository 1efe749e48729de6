//! Application layer with the store orchestrator.

/// Store services.
pub mod services;

pub use services::{ImageStore, PendingRequestRegistry, ThumbnailPreloader};
