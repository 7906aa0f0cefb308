//! Plan and stage executors.
//!
//! The stage executor is the recursive scheduler at the heart of volley:
//! it validates each node as it is reached, derives a scoped cancellation
//! boundary, dispatches leaves through the capability set, fans out into
//! children sequentially or concurrently, and honors repeat counts. The plan
//! executor validates the whole tree eagerly, handles the scheduled start,
//! and drives the top-level stages through it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture};
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use super::capability::CapabilitySet;
use super::context::RunContext;
use super::rate_limiter::RateLimiter;
use crate::error::{AggregateError, BranchFailure, Error, Result};
use crate::metrics;
use crate::plan::{validate_plan, validate_stage, Payload, Plan, Stage};

/// Recursive stage scheduler, constructed once per run with a fixed
/// capability set.
pub struct StageExecutor {
    capabilities: CapabilitySet,
    limiter: Option<Arc<RateLimiter>>,
}

impl StageExecutor {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            limiter: None,
        }
    }

    /// Throttle leaf operations through a shared rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Execute a stage subtree to completion.
    pub async fn execute(&self, ctx: &RunContext, stage: &Stage) -> Result<()> {
        self.execute_stage(ctx, stage, stage.repeat).await
    }

    /// One full invocation of a stage, with `remaining` extra passes left.
    ///
    /// The remaining-repeat count is threaded through the recursion instead
    /// of being decremented on the node, so the configured value survives the
    /// run and the plan object stays reusable.
    fn execute_stage<'a>(
        &'a self,
        ctx: &'a RunContext,
        stage: &'a Stage,
        remaining: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // Structural check first, before deriving any scope or touching
            // the capability set.
            validate_stage(stage)?;

            let scoped = match stage.timeout() {
                Some(timeout) => ctx.child_with_timeout(timeout),
                None => ctx.child(),
            };

            // A leaf or sequential-mode error returns immediately; only a
            // concurrent fan-out's aggregate is held so repetition can
            // continue past a partial failure.
            let mut fan_out_failure: Option<Error> = None;

            if let Some(payload) = &stage.payload {
                self.dispatch(&scoped, stage, payload).await?;
            } else if stage.concurrent && stage.children.len() > 1 {
                if let Err(err) = self.fan_out(&scoped, stage).await {
                    fan_out_failure = Some(err);
                }
            } else {
                for child in &stage.children {
                    self.execute_stage(&scoped, child, child.repeat).await?;
                }
            }

            // Release the scope before any repeat pass: each repetition gets
            // a fresh timeout while staying bounded by ancestor deadlines
            // through the original context.
            drop(scoped);

            if remaining > 0 {
                debug!(stage = %stage.name, remaining, "repeating stage");
                return self.execute_stage(ctx, stage, remaining - 1).await;
            }

            match fan_out_failure {
                None => Ok(()),
                Some(err) => Err(err),
            }
        })
    }

    /// Dispatch a leaf payload to its protocol executor.
    async fn dispatch(&self, ctx: &RunContext, stage: &Stage, payload: &Payload) -> Result<()> {
        let protocol = payload.protocol();
        let executor = self
            .capabilities
            .get(protocol)
            .ok_or(Error::NoCapability(protocol))?;

        if let Some(limiter) = &self.limiter {
            limiter.wait(ctx).await?;
        }

        debug!(stage = %stage.name, %protocol, "dispatching");
        let started = Instant::now();
        let result = executor.execute(ctx, payload).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::record_operation(protocol.as_str(), status);
        metrics::record_operation_duration(started.elapsed(), protocol.as_str());

        if let Err(err) = &result {
            warn!(stage = %stage.name, %protocol, error = %err, "operation failed");
        }
        result
    }

    /// Run all children concurrently against the same scope, waiting for
    /// every branch regardless of individual failures.
    async fn fan_out(&self, ctx: &RunContext, stage: &Stage) -> Result<()> {
        debug!(stage = %stage.name, children = stage.children.len(), "fanning out");

        let results = join_all(
            stage
                .children
                .iter()
                .map(|child| self.execute_stage(ctx, child, child.repeat)),
        )
        .await;

        let failures: Vec<BranchFailure> = stage
            .children
            .iter()
            .zip(results)
            .filter_map(|(child, result)| {
                result.err().map(|error| BranchFailure {
                    stage: child.name.clone(),
                    error: Box::new(error),
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(failures).into())
        }
    }
}

/// Top-level plan driver.
pub struct PlanExecutor {
    stages: StageExecutor,
}

impl PlanExecutor {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            stages: StageExecutor::new(capabilities),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.stages = self.stages.with_rate_limiter(limiter);
        self
    }

    /// Execute a plan to completion.
    ///
    /// Validates the whole tree eagerly, waits for a future scheduled start
    /// (cancellation wins the race), derives the run boundary from the plan
    /// duration, and drives the top-level stages sequentially, fail-fast.
    #[instrument(
        name = "plan.execute",
        skip_all,
        fields(plan = %plan.name, run_id = tracing::field::Empty)
    )]
    pub async fn execute(&self, ctx: &RunContext, plan: &Plan) -> Result<()> {
        validate_plan(plan)?;

        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());

        if let Some(start_at) = plan.start_at {
            let now = Utc::now();
            if start_at > now {
                let wait = (start_at - now).to_std().unwrap_or(Duration::ZERO);
                info!(%start_at, "waiting for scheduled start");
                ctx.sleep("waiting for scheduled start", wait).await?;
            }
        }

        let run = match plan.duration() {
            Some(duration) => ctx.child_with_timeout(duration),
            None => ctx.child(),
        };

        info!(
            top_level = plan.stages.len(),
            total = plan.stage_count(),
            "starting run"
        );
        metrics::inc_active_runs();
        let started = Instant::now();

        let result = self.run_passes(&run, plan).await;

        metrics::dec_active_runs();
        metrics::record_plan_run(if result.is_ok() { "completed" } else { "failed" });
        metrics::record_plan_duration(started.elapsed(), &plan.name);

        match &result {
            Ok(()) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "run completed"
            ),
            Err(err) => error!(error = %err, code = err.code(), "run failed"),
        }
        result
    }

    async fn run_passes(&self, run: &RunContext, plan: &Plan) -> Result<()> {
        let mut remaining = plan.repeat;
        loop {
            for stage in &plan.stages {
                self.stages.execute(run, stage).await?;
            }
            if remaining == 0 {
                return Ok(());
            }
            remaining -= 1;
        }
    }
}
