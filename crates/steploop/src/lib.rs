//! steploop - plan step runner
//!
//! Runtime components: shell and git probes, provider adapters, retries,
//! verification gates, and the scheduler that ties them together.

pub mod baseline;
pub mod commit;
pub mod criteria;
pub mod git;
pub mod noop;
pub mod post_check;
pub mod progress;
pub mod provider;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod shell;

pub use progress::ProgressSink;
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use retry::{RetryPolicy, RetryingExecutor};
pub use scheduler::{RunSummary, SchedulerError, StepScheduler};
