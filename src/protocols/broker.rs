//! Message broker protocol executor (Redis pub/sub).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{payload_mismatch, Protocol, ProtocolExecutor};
use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::plan::Payload;

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Publishes a batch of messages to one topic.
pub struct BrokerExecutor;

impl BrokerExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BrokerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolExecutor for BrokerExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Broker
    }

    fn description(&self) -> &str {
        "Publish message batches to a Redis pub/sub topic"
    }

    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()> {
        let Payload::Broker(cfg) = payload else {
            return Err(payload_mismatch(Protocol::Broker, payload));
        };

        let client = redis::Client::open(cfg.url.as_str())?;
        let connect = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            client.get_multiplexed_async_connection(),
        );
        let mut conn = match ctx.run("connecting to broker", connect).await? {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(Error::Execution(format!(
                    "connection to '{}' timed out",
                    cfg.url
                )))
            }
        };

        for message in &cfg.messages {
            ctx.run(
                "publishing message",
                conn.publish::<_, _, ()>(&cfg.topic, message),
            )
            .await??;
        }

        debug!(topic = %cfg.topic, messages = cfg.messages.len(), "batch published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BrokerPayload;

    #[tokio::test]
    async fn test_invalid_url_is_redis_error() {
        let executor = BrokerExecutor::new();
        let ctx = RunContext::new();
        let payload = Payload::Broker(BrokerPayload {
            url: "not-a-url".into(),
            topic: "orders".into(),
            messages: vec!["m".into()],
        });

        let err = executor.execute(&ctx, &payload).await.unwrap_err();
        assert_eq!(err.code(), "REDIS_ERROR");
    }
}
