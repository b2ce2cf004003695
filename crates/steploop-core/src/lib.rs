pub mod analytics;
pub mod classify;
pub mod config;
pub mod events;
pub mod fingerprint;
pub mod narrative;
pub mod plan;
pub mod prompt;
pub mod types;

pub use analytics::LoopAnalytics;
pub use classify::{classify_failure, FailureKind};
pub use config::Config;
pub use plan::{PlanError, PlanStore};
pub use types::*;
