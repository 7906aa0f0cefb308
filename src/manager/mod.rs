//! Plan managers: keyed stores of named plans that can also execute them.

mod distributed;
mod store;

pub use distributed::{ChangeHandler, DistributedPlanManager, NoopChangeHandler};
pub use store::{
    ChangeEvent, ChangeKind, MemoryPlanStore, PlanStore, RedisPlanStore, StoreWatcher,
};

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::engine::{PlanExecutor, RunContext};
use crate::error::{Error, Result};
use crate::plan::{validate_plan, Plan};

/// A keyed store of named plans, able to execute them through the plan
/// executor.
#[async_trait]
pub trait PlanManager: Send + Sync {
    async fn get(&self, name: &str) -> Result<Plan>;

    /// Validate and store a plan, replacing any existing plan of that name.
    async fn add(&self, plan: Plan) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// All stored plans, sorted by name.
    async fn plans(&self) -> Result<Vec<Plan>>;

    /// Execute a plan through the plan executor.
    async fn execute(&self, ctx: &RunContext, plan: &Plan) -> Result<()>;
}

/// In-process manager backed by a locked map.
pub struct InMemoryPlanManager {
    plans: RwLock<HashMap<String, Plan>>,
    executor: PlanExecutor,
}

impl InMemoryPlanManager {
    pub fn new(executor: PlanExecutor) -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            executor,
        }
    }
}

#[async_trait]
impl PlanManager for InMemoryPlanManager {
    async fn get(&self, name: &str) -> Result<Plan> {
        self.plans
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn add(&self, plan: Plan) -> Result<()> {
        validate_plan(&plan)?;
        self.plans
            .write()
            .unwrap()
            .insert(plan.name.clone(), plan);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.plans.write().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    async fn plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.plans.read().unwrap().values().cloned().collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }

    async fn execute(&self, ctx: &RunContext, plan: &Plan) -> Result<()> {
        self.executor.execute(ctx, plan).await
    }
}
