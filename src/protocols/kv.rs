//! Key-value store protocol executor (Redis).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{payload_mismatch, Protocol, ProtocolExecutor};
use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::plan::{KvCommand, Payload};

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Executes an ordered batch of key-value commands against one server.
///
/// Connections are opened per unit of work; the payload carries the target,
/// so one executor instance serves any number of servers.
pub struct KvExecutor;

impl KvExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KvExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolExecutor for KvExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Kv
    }

    fn description(&self) -> &str {
        "Run set/get/del command batches against a Redis-compatible store"
    }

    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()> {
        let Payload::Kv(cfg) = payload else {
            return Err(payload_mismatch(Protocol::Kv, payload));
        };

        let client = redis::Client::open(cfg.url.as_str())?;
        let connect = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            client.get_multiplexed_async_connection(),
        );
        let mut conn = match ctx.run("connecting to key-value store", connect).await? {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(Error::Execution(format!(
                    "connection to '{}' timed out",
                    cfg.url
                )))
            }
        };

        for op in &cfg.ops {
            match op.command {
                KvCommand::Set => {
                    let value = op.value.as_deref().unwrap_or_default();
                    ctx.run("running SET", conn.set::<_, _, ()>(&op.key, value))
                        .await??;
                }
                KvCommand::Get => {
                    ctx.run("running GET", conn.get::<_, Option<String>>(&op.key))
                        .await??;
                }
                KvCommand::Del => {
                    ctx.run("running DEL", conn.del::<_, ()>(&op.key)).await??;
                }
            }
        }

        debug!(url = %cfg.url, ops = cfg.ops.len(), "batch finished");
        Ok(())
    }
}
