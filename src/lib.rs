//! volley - multi-protocol load generation engine
//!
//! volley drives configurable volumes of traffic against HTTP services,
//! key-value stores, SQL databases, message brokers, and raw sockets from a
//! single declarative execution plan.
//!
//! ## Key Ideas
//!
//! - **Plans are trees**: a stage is either a leaf bound to one protocol
//!   payload or a container of children run sequentially or concurrently
//! - **Capability dispatch**: leaves route through a per-run capability set;
//!   a missing backend is a distinct, observable error, never a silent skip
//! - **Bounded everywhere**: per-stage timeouts nest inside the plan
//!   deadline, and cancellation propagates through every suspension point
//!
//! ## Example
//!
//! ```yaml
//! name: checkout-soak
//! tags: [nightly]
//! duration_seconds: 300
//!
//! stages:
//!   - name: warmup
//!     payload:
//!       protocol: http
//!       url: https://staging.example.com/healthz
//!
//!   - name: mixed-load
//!     concurrent: true
//!     children:
//!       - name: browse
//!         repeat: 99
//!         payload:
//!           protocol: http
//!           url: https://staging.example.com/catalog
//!       - name: cache-churn
//!         repeat: 9
//!         payload:
//!           protocol: kv
//!           url: redis://127.0.0.1:6379
//!           ops:
//!             - command: set
//!               key: "session:1"
//!               value: "1"
//! ```
//!
//! ```no_run
//! use volley::engine::{CapabilitySet, PlanExecutor, RunContext};
//! use volley::plan::parse_plan_file;
//!
//! # async fn run() -> volley::Result<()> {
//! let plan = parse_plan_file(std::path::Path::new("plan.yaml"))?;
//! let executor = PlanExecutor::new(CapabilitySet::with_defaults());
//! executor.execute(&RunContext::new(), &plan).await
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod plan;
pub mod protocols;
pub mod telemetry;

pub use error::{Error, Result};
