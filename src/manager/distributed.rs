//! Distributed plan manager.
//!
//! Persists plans as YAML under a key prefix in a [`PlanStore`] and runs a
//! single background watch loop over that prefix, so externally-submitted
//! plans are observed as they land in the store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{ChangeEvent, PlanStore};
use super::PlanManager;
use crate::engine::{PlanExecutor, RunContext};
use crate::error::{Error, Result};
use crate::plan::{parse_plan, validate_plan, Plan};

const DEFAULT_KEY_PREFIX: &str = "volley/plans/";

/// Extension point invoked for every change event the watch loop observes.
///
/// The default handler does nothing: what a deployment should do with an
/// externally-submitted plan (register it locally, trigger a run, ignore it)
/// is a policy decision left to embedders.
pub trait ChangeHandler: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// The default do-nothing handler.
pub struct NoopChangeHandler;

impl ChangeHandler for NoopChangeHandler {
    fn on_change(&self, _event: &ChangeEvent) {}
}

struct WatchHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Manager backed by a shared keyed store.
pub struct DistributedPlanManager {
    store: Arc<dyn PlanStore>,
    executor: PlanExecutor,
    prefix: String,
    handler: Arc<dyn ChangeHandler>,
    watch: tokio::sync::Mutex<Option<WatchHandle>>,
}

impl DistributedPlanManager {
    pub fn new(store: Arc<dyn PlanStore>, executor: PlanExecutor) -> Self {
        Self {
            store,
            executor,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            handler: Arc::new(NoopChangeHandler),
            watch: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ChangeHandler>) -> Self {
        self.handler = handler;
        self
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Start the background watch loop. Idempotent: a second call while the
    /// loop is running does nothing.
    pub async fn start_watch(&self) {
        let mut guard = self.watch.lock().await;
        if guard.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let mut watcher = self.store.watch(&self.prefix);
        let handler = self.handler.clone();
        let prefix = self.prefix.clone();

        let task = tokio::spawn(async move {
            info!(%prefix, "plan watch loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("plan watch loop stopping");
                        break;
                    }
                    event = watcher.recv() => match event {
                        Ok(event) => {
                            debug!(key = %event.key, kind = ?event.kind, "observed plan change");
                            handler.on_change(&event);
                        }
                        Err(e) => {
                            warn!(error = %e, "plan watch stream ended");
                            break;
                        }
                    }
                }
            }
        });

        *guard = Some(WatchHandle { stop, task });
    }

    /// Stop the watch loop and wait for the task to finish.
    pub async fn stop_watch(&self) {
        if let Some(handle) = self.watch.lock().await.take() {
            handle.stop.cancel();
            if let Err(e) = handle.task.await {
                warn!("plan watch task join error: {}", e);
            }
        }
    }
}

#[async_trait]
impl PlanManager for DistributedPlanManager {
    async fn get(&self, name: &str) -> Result<Plan> {
        match self.store.get(&self.key(name)).await? {
            Some(yaml) => parse_plan(&yaml),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    async fn add(&self, plan: Plan) -> Result<()> {
        validate_plan(&plan)?;
        let yaml = serde_yaml::to_string(&plan)?;
        self.store.put(&self.key(&plan.name), &yaml).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let key = self.key(name);
        if self.store.get(&key).await?.is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        self.store.delete(&key).await
    }

    async fn plans(&self) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        for (key, yaml) in self.store.scan_prefix(&self.prefix).await? {
            match parse_plan(&yaml) {
                Ok(plan) => plans.push(plan),
                Err(e) => warn!(%key, error = %e, "skipping unparseable stored plan"),
            }
        }
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }

    async fn execute(&self, ctx: &RunContext, plan: &Plan) -> Result<()> {
        self.executor.execute(ctx, plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CapabilitySet;
    use crate::manager::store::{ChangeKind, MemoryPlanStore};
    use crate::plan::parse_plan;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        puts: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                puts: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            })
        }
    }

    impl ChangeHandler for CountingHandler {
        fn on_change(&self, event: &ChangeEvent) {
            match event.kind {
                ChangeKind::Put => self.puts.fetch_add(1, Ordering::SeqCst),
                ChangeKind::Delete => self.deletes.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    fn manager() -> DistributedPlanManager {
        DistributedPlanManager::new(
            Arc::new(MemoryPlanStore::new()),
            PlanExecutor::new(CapabilitySet::new()),
        )
    }

    fn sample(name: &str) -> Plan {
        parse_plan(&format!(
            r#"
name: {}
stages:
  - name: {}-probe
    payload:
      protocol: http
      url: https://example.com
"#,
            name, name
        ))
        .unwrap()
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let manager = manager();
        manager.add(sample("alpha")).await.unwrap();

        let plan = manager.get("alpha").await.unwrap();
        assert_eq!(plan.name, "alpha");
        assert_eq!(plan.stages[0].name, "alpha-probe");

        manager.delete("alpha").await.unwrap();
        assert_eq!(manager.get("alpha").await.unwrap_err().code(), "NOT_FOUND");
        assert_eq!(
            manager.delete("alpha").await.unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_plans_lists_stored_plans_sorted() {
        let manager = manager();
        manager.add(sample("beta")).await.unwrap();
        manager.add(sample("alpha")).await.unwrap();

        let names: Vec<String> = manager
            .plans()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_watch_loop_observes_changes_and_stops_cleanly() {
        let handler = CountingHandler::new();
        let manager = manager().with_handler(handler.clone());

        manager.start_watch().await;
        manager.start_watch().await; // idempotent

        manager.add(sample("alpha")).await.unwrap();
        wait_for(|| handler.puts.load(Ordering::SeqCst) == 1).await;

        manager.delete("alpha").await.unwrap();
        wait_for(|| handler.deletes.load(Ordering::SeqCst) == 1).await;

        // stop_watch awaits the task, so returning proves it did not leak.
        manager.stop_watch().await;
        manager.stop_watch().await; // idempotent

        // After stopping, further changes are not observed.
        manager.add(sample("beta")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.puts.load(Ordering::SeqCst), 1);
    }
}
