// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod behavior;
pub mod config;
pub mod error;
pub mod labeler;
pub mod ledger;
pub mod mailbox;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod review;
pub mod rules;
pub mod store;
pub mod telemetry;
pub mod thread;
pub mod vectorize;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::behavior::BehaviorLabel;
pub use crate::config::OrchestratorConfig;
pub use crate::error::{OrchestratorError, Result};
pub use crate::pipeline::Pipeline;
pub use crate::rules::{resolve, RuleTable, FALLBACK_ACTION};
pub use crate::thread::{Prediction, Thread};
