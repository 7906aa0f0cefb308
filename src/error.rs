//! Error types for volley.
//!
//! The executor distinguishes configuration mistakes (structural problems,
//! missing capabilities) from runtime failures (protocol errors, timeouts),
//! and each variant carries a stable code for programmatic handling.

use thiserror::Error;

use crate::protocols::Protocol;

/// Result type alias for volley operations.
pub type Result<T> = std::result::Result<T, Error>;

/// volley error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed plan or stage: duplicate names, a node that is neither a
    /// leaf nor a container, an invalid payload. Detected at validation time,
    /// never retried.
    #[error("Structural error: {0}")]
    Structural(String),

    /// A stage requested a protocol the run's capability set has no executor
    /// for. A wiring mistake, not a runtime failure.
    #[error("No executor registered for protocol '{0}'")]
    NoCapability(Protocol),

    /// Opaque failure reported by a protocol executor.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Union of failures from a concurrent fan-out. Every failing branch is
    /// represented; none are dropped.
    #[error(transparent)]
    Aggregate(AggregateError),

    /// A deadline (stage timeout or plan duration) expired.
    #[error("Deadline exceeded while {0}")]
    Timeout(String),

    /// The run was cancelled by the caller.
    #[error("Canceled while {0}")]
    Canceled(String),

    #[error("Plan not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Key-value store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, machine-parseable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Structural(_) => "STRUCTURAL_ERROR",
            Error::NoCapability(_) => "NO_CAPABILITY",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::Aggregate(_) => "AGGREGATE_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Canceled(_) => "CANCELED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Redis(_) => "REDIS_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error belongs to the cancellation class (deadline expiry
    /// or caller cancellation) rather than a protocol-level failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Canceled(_))
    }
}

/// One failing branch of a concurrent fan-out.
#[derive(Debug)]
pub struct BranchFailure {
    /// Name of the child stage that failed.
    pub stage: String,
    pub error: Box<Error>,
}

/// Error produced at a concurrent fan-out point, wrapping every non-ok
/// branch. A parent treats the aggregate as that node's single error.
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<BranchFailure>,
}

impl AggregateError {
    pub fn new(failures: Vec<BranchFailure>) -> Self {
        Self { failures }
    }

    /// Names of the failing branches, in declaration order.
    pub fn stages(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.stage.as_str()).collect()
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} concurrent stage(s) failed: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "[{}] {}", failure.stage, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl From<AggregateError> for Error {
    fn from(err: AggregateError) -> Self {
        Error::Aggregate(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Structural("x".into()).code(), "STRUCTURAL_ERROR");
        assert_eq!(Error::NoCapability(Protocol::Http).code(), "NO_CAPABILITY");
        assert_eq!(Error::Timeout("dispatch".into()).code(), "TIMEOUT");
    }

    #[test]
    fn test_cancellation_class() {
        assert!(Error::Timeout("x".into()).is_cancellation());
        assert!(Error::Canceled("x".into()).is_cancellation());
        assert!(!Error::Execution("x".into()).is_cancellation());
        assert!(!Error::NoCapability(Protocol::Kv).is_cancellation());
    }

    #[test]
    fn test_aggregate_display_names_every_branch() {
        let agg = AggregateError::new(vec![
            BranchFailure {
                stage: "ping".into(),
                error: Box::new(Error::Execution("connection refused".into())),
            },
            BranchFailure {
                stage: "query".into(),
                error: Box::new(Error::Timeout("dispatching to 'sql'".into())),
            },
        ]);

        let msg = agg.to_string();
        assert!(msg.contains("2 concurrent stage(s) failed"));
        assert!(msg.contains("[ping]"));
        assert!(msg.contains("[query]"));
        assert_eq!(agg.stages(), vec!["ping", "query"]);
    }
}
