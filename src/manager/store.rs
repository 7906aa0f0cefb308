//! Keyed plan storage with change notification.
//!
//! `PlanStore` is the interface a distributed manager needs: plain key-value
//! operations, prefix scans, and a watch primitive delivering change events.
//! The in-memory implementation uses a broadcast channel; the Redis
//! implementation publishes change events on a pub/sub channel so multiple
//! processes observe each other's writes.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Broadcast capacity for the in-memory change feed.
const MEMORY_CHANNEL_CAPACITY: usize = 1024;

/// Pub/sub channel carrying Redis store change events.
const REDIS_EVENTS_CHANNEL: &str = "volley:store:events";

/// Redis connection timeout in seconds.
const REDIS_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Put,
    Delete,
}

/// One observed change under a watched prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Keyed store with prefix scans and watch-based change notification.
#[async_trait]
pub trait PlanStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All key/value pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Subscribe to future changes under `prefix`.
    fn watch(&self, prefix: &str) -> Box<dyn StoreWatcher>;
}

/// A subscription created by [`PlanStore::watch`].
#[async_trait]
pub trait StoreWatcher: Send {
    /// Wait for the next change event under the watched prefix.
    async fn recv(&mut self) -> Result<ChangeEvent>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-process store backed by a locked map and a broadcast change feed.
pub struct MemoryPlanStore {
    entries: RwLock<HashMap<String, String>>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(MEMORY_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            tx,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.tx.send(event);
    }
}

impl Default for MemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.publish(ChangeEvent {
            kind: ChangeKind::Put,
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        self.publish(ChangeEvent {
            kind: ChangeKind::Delete,
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut out: Vec<(String, String)> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn watch(&self, prefix: &str) -> Box<dyn StoreWatcher> {
        Box::new(MemoryWatcher {
            rx: self.tx.subscribe(),
            prefix: prefix.to_string(),
        })
    }
}

struct MemoryWatcher {
    rx: broadcast::Receiver<ChangeEvent>,
    prefix: String,
}

#[async_trait]
impl StoreWatcher for MemoryWatcher {
    async fn recv(&mut self) -> Result<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("store watcher lagged by {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Storage("change feed closed".to_string()));
                }
            }
        }
    }
}

// ============================================================================
// Redis implementation
// ============================================================================

/// Redis-backed store. Writes publish a change event on a shared pub/sub
/// channel, so watchers in other processes observe them.
pub struct RedisPlanStore {
    client: redis::Client,
}

impl RedisPlanStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        info!("Redis plan store created (url: {})", redis_url);
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        tokio::time::timeout(
            Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECS),
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Storage("Redis connection timeout".to_string()))?
        .map_err(Error::from)
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(event)?;
        conn.publish::<_, _, ()>(REDIS_EVENTS_CHANNEL, &payload)
            .await?;
        debug!(key = %event.key, "published store change event");
        Ok(())
    }
}

#[async_trait]
impl PlanStore for RedisPlanStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value).await?;
        self.publish(&ChangeEvent {
            kind: ChangeKind::Put,
            key: key.to_string(),
            value: Some(value.to_string()),
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        self.publish(&ChangeEvent {
            kind: ChangeKind::Delete,
            key: key.to_string(),
            value: None,
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.connection().await?;

        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> =
                conn.scan_match(format!("{}*", prefix)).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();

        let mut out = Vec::new();
        for key in keys {
            if let Some(value) = conn.get::<_, Option<String>>(&key).await? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    fn watch(&self, prefix: &str) -> Box<dyn StoreWatcher> {
        Box::new(RedisWatcher {
            client: self.client.clone(),
            prefix: prefix.to_string(),
            state: WatcherState::NotConnected,
        })
    }
}

enum WatcherState {
    NotConnected,
    Connected(redis::aio::PubSub),
}

struct RedisWatcher {
    client: redis::Client,
    prefix: String,
    state: WatcherState,
}

#[async_trait]
impl StoreWatcher for RedisWatcher {
    async fn recv(&mut self) -> Result<ChangeEvent> {
        use futures_util::StreamExt;

        // Lazily connect and subscribe on first recv().
        if matches!(self.state, WatcherState::NotConnected) {
            let mut pubsub = tokio::time::timeout(
                Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECS),
                self.client.get_async_pubsub(),
            )
            .await
            .map_err(|_| Error::Storage("Redis connection timeout".to_string()))??;

            pubsub.subscribe(REDIS_EVENTS_CHANNEL).await?;
            info!("store watcher subscribed to '{}'", REDIS_EVENTS_CHANNEL);
            self.state = WatcherState::Connected(pubsub);
        }

        let pubsub = match &mut self.state {
            WatcherState::Connected(ps) => ps,
            WatcherState::NotConnected => unreachable!(),
        };

        let mut stream = pubsub.on_message();
        loop {
            match stream.next().await {
                Some(msg) => {
                    let payload: String = msg
                        .get_payload()
                        .map_err(|e| Error::Storage(e.to_string()))?;
                    let event: ChangeEvent = serde_json::from_str(&payload)?;
                    if event.key.starts_with(&self.prefix) {
                        return Ok(event);
                    }
                }
                None => {
                    return Err(Error::Storage("Redis pub/sub stream ended".to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryPlanStore::new();
        store.put("volley/plans/a", "one").await.unwrap();

        assert_eq!(
            store.get("volley/plans/a").await.unwrap().as_deref(),
            Some("one")
        );
        assert!(store.get("volley/plans/b").await.unwrap().is_none());

        store.delete("volley/plans/a").await.unwrap();
        assert!(store.get("volley/plans/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_scan_prefix() {
        let store = MemoryPlanStore::new();
        store.put("volley/plans/b", "2").await.unwrap();
        store.put("volley/plans/a", "1").await.unwrap();
        store.put("other/x", "3").await.unwrap();

        let scanned = store.scan_prefix("volley/plans/").await.unwrap();
        assert_eq!(
            scanned,
            vec![
                ("volley/plans/a".to_string(), "1".to_string()),
                ("volley/plans/b".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_store_watch_delivers_changes() {
        let store = MemoryPlanStore::new();
        let mut watcher = store.watch("volley/plans/");

        store.put("volley/plans/a", "1").await.unwrap();
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Put);
        assert_eq!(event.key, "volley/plans/a");
        assert_eq!(event.value.as_deref(), Some("1"));

        store.delete("volley/plans/a").await.unwrap();
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.value.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_watch_filters_by_prefix() {
        let store = MemoryPlanStore::new();
        let mut watcher = store.watch("volley/plans/");

        store.put("unrelated/key", "x").await.unwrap();
        store.put("volley/plans/a", "1").await.unwrap();

        // The unrelated write is skipped; the next event is the matching one.
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.key, "volley/plans/a");
    }

    #[tokio::test]
    async fn test_redis_store_rejects_bad_url() {
        assert!(RedisPlanStore::new("not a url").is_err());
        assert!(RedisPlanStore::new("redis://127.0.0.1:6379").is_ok());
    }

    #[test]
    fn test_change_event_wire_shape() {
        let event = ChangeEvent {
            kind: ChangeKind::Put,
            key: "volley/plans/a".into(),
            value: Some("yaml".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"put\""));

        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ChangeKind::Put);
    }
}
