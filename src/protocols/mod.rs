//! Protocol executors.
//!
//! Each executor implements one narrow contract: run a single unit of
//! configured work against a backend, honoring cancellation. Executors never
//! retry; failures are surfaced to the stage executor unchanged.

mod broker;
mod http;
mod kv;
mod net;
mod sql;

pub use broker::BrokerExecutor;
pub use http::HttpExecutor;
pub use kv::KvExecutor;
pub use net::NetExecutor;
pub use sql::SqlExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::RunContext;
use crate::error::Result;
use crate::plan::Payload;

/// Protocol tags a stage payload can dispatch on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Kv,
    Sql,
    Broker,
    Net,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Kv => "kv",
            Protocol::Sql => "sql",
            Protocol::Broker => "broker",
            Protocol::Net => "net",
        }
    }

    /// The full catalog, in dispatch-tag order.
    pub fn all() -> [Protocol; 5] {
        [
            Protocol::Http,
            Protocol::Kv,
            Protocol::Sql,
            Protocol::Broker,
            Protocol::Net,
        ]
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait all protocol executors implement.
#[async_trait]
pub trait ProtocolExecutor: Send + Sync {
    /// The protocol tag this executor serves.
    fn protocol(&self) -> Protocol;

    /// Execute one configured unit of work.
    ///
    /// The payload is guaranteed by the dispatcher to carry this executor's
    /// protocol tag. Implementations must observe `ctx` at every suspension
    /// point and must not retry.
    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()>;

    fn description(&self) -> &str {
        "A protocol executor"
    }
}

/// Shorthand for the dispatch-mismatch error used by all built-in executors.
pub(crate) fn payload_mismatch(expected: Protocol, got: &Payload) -> crate::error::Error {
    crate::error::Error::Structural(format!(
        "payload for protocol '{}' dispatched to the '{}' executor",
        got.protocol(),
        expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip_names() {
        for protocol in Protocol::all() {
            assert_eq!(protocol.to_string(), protocol.as_str());
        }
    }

    #[test]
    fn test_protocol_serde_tag() {
        let json = serde_json::to_string(&Protocol::Broker).unwrap();
        assert_eq!(json, "\"broker\"");
        let back: Protocol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Protocol::Broker);
    }
}
