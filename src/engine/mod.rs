//! Execution engine: run contexts, capability dispatch, the recursive stage
//! scheduler, and rate limiting.

mod capability;
mod context;
mod executor;
mod rate_limiter;

pub use capability::CapabilitySet;
pub use context::RunContext;
pub use executor::{PlanExecutor, StageExecutor};
pub use rate_limiter::{LimiterSink, MetricsSink, Rate, RateLimiter};
