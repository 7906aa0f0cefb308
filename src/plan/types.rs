//! Plan and stage type definitions.
//!
//! A plan is a named tree of stages. Each stage is either a leaf bound to
//! exactly one protocol payload, or a container of child stages executed
//! sequentially or concurrently. The YAML shape of these types is the wire
//! contract for plan submission and storage.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocols::Protocol;

/// Coarse lifecycle state of a plan or stage.
///
/// Advisory for now: tracked on the node but not consulted by the scheduler.
/// Reserved for pause/resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Waiting,
    Running,
    Paused,
    Complete,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Waiting => write!(f, "waiting"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Paused => write!(f, "paused"),
            ExecutionState::Complete => write!(f, "complete"),
        }
    }
}

/// A complete execution plan.
///
/// # Example YAML
///
/// ```yaml
/// name: checkout-soak
/// tags: [nightly, staging]
/// duration_seconds: 300
///
/// stages:
///   - name: warmup
///     payload:
///       protocol: http
///       url: https://staging.example.com/healthz
///
///   - name: mixed-load
///     concurrent: true
///     children:
///       - name: browse
///         repeat: 99
///         payload:
///           protocol: http
///           url: https://staging.example.com/catalog
///       - name: cache-churn
///         repeat: 9
///         payload:
///           protocol: kv
///           url: redis://127.0.0.1:6379
///           ops:
///             - command: set
///               key: "session:1"
///               value: "1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan name (used as identifier).
    pub name: String,

    /// Free-form tags for grouping and filtering.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Top-level stages, executed sequentially and fail-fast.
    pub stages: Vec<Stage>,

    /// Extra full passes over the top-level sequence after the first.
    #[serde(default)]
    pub repeat: u64,

    /// Total run duration. When set, the whole run (all passes) is bounded
    /// by now + duration.
    #[serde(default)]
    pub duration_seconds: Option<u64>,

    /// Scheduled start time. A future instant delays execution; a past one
    /// is ignored.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,

    /// Advisory lifecycle state.
    #[serde(skip)]
    pub state: ExecutionState,
}

impl Plan {
    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds.map(Duration::from_secs)
    }

    /// Total number of stages in the tree.
    pub fn stage_count(&self) -> usize {
        fn count(stage: &Stage) -> usize {
            1 + stage.children.iter().map(count).sum::<usize>()
        }
        self.stages.iter().map(count).sum()
    }

    /// All protocols referenced by leaf payloads anywhere in the tree,
    /// sorted and deduplicated.
    pub fn protocols(&self) -> Vec<Protocol> {
        fn collect(stage: &Stage, out: &mut Vec<Protocol>) {
            if let Some(payload) = &stage.payload {
                out.push(payload.protocol());
            }
            for child in &stage.children {
                collect(child, out);
            }
        }
        let mut protocols = Vec::new();
        for stage in &self.stages {
            collect(stage, &mut protocols);
        }
        protocols.sort();
        protocols.dedup();
        protocols
    }
}

/// A node in the execution tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, unique across the entire plan tree.
    pub name: String,

    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Child stages, exclusively owned by this node.
    #[serde(default)]
    pub children: Vec<Stage>,

    /// Run children in parallel instead of in declared order.
    #[serde(default)]
    pub concurrent: bool,

    /// Extra repetitions after the first pass. The configured value is never
    /// mutated during execution; the remaining count is threaded through the
    /// recursion instead, so a plan object is reusable across runs.
    #[serde(default)]
    pub repeat: u64,

    /// Advisory duration metadata carried in the wire contract.
    #[serde(default)]
    pub duration_seconds: Option<u64>,

    /// Per-pass timeout. Each repetition gets a fresh timeout scope, all of
    /// them bounded by ancestor deadlines.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Protocol payload. Present on leaves, absent on containers.
    #[serde(default)]
    pub payload: Option<Payload>,

    /// Advisory lifecycle state.
    #[serde(skip)]
    pub state: ExecutionState,
}

impl Stage {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn is_leaf(&self) -> bool {
        self.payload.is_some()
    }
}

/// Protocol-specific configuration payload.
///
/// Internally tagged on `protocol`, so a stage can carry at most one payload
/// by construction and the wire shape names the protocol explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum Payload {
    Http(HttpPayload),
    Kv(KvPayload),
    Sql(SqlPayload),
    Broker(BrokerPayload),
    Net(NetPayload),
}

impl Payload {
    /// The protocol tag this payload dispatches on.
    pub fn protocol(&self) -> Protocol {
        match self {
            Payload::Http(_) => Protocol::Http,
            Payload::Kv(_) => Protocol::Kv,
            Payload::Sql(_) => Protocol::Sql,
            Payload::Broker(_) => Protocol::Broker,
            Payload::Net(_) => Protocol::Net,
        }
    }
}

/// HTTP request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPayload {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body sent with the request.
    #[serde(default)]
    pub body: Option<Value>,

    /// Per-request timeout, independent of the stage timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// When set, any other response status is an execution error.
    #[serde(default)]
    pub expect_status: Option<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Key-value store payload: an ordered list of commands against one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvPayload {
    /// Server URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,

    pub ops: Vec<KvOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvOp {
    pub command: KvCommand,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvCommand {
    Set,
    Get,
    Del,
}

/// SQL payload: an ordered list of statements against one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlPayload {
    /// Database path or `:memory:`.
    pub database: String,

    pub statements: Vec<SqlStatement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlStatement {
    pub query: String,

    /// `query` returns rows, `execute` returns an affected-row count.
    #[serde(default)]
    pub kind: SqlKind,

    /// Upper bound on rows fetched by a `query` statement.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlKind {
    #[default]
    Query,
    Execute,
}

fn default_max_rows() -> usize {
    1000
}

/// Message broker payload: publish a batch of messages to one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPayload {
    /// Broker URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,

    pub topic: String,

    pub messages: Vec<String>,
}

/// Raw network payload: connect, optionally send, optionally read a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetPayload {
    /// Target address, `host:port`.
    pub addr: String,

    #[serde(default)]
    pub transport: Transport,

    /// Bytes to send after connecting (UTF-8).
    #[serde(default)]
    pub send: Option<String>,

    /// Read a reply after sending.
    #[serde(default)]
    pub expect_reply: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}
