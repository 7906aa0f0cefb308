//! SQL protocol executor (SQLite).

use async_trait::async_trait;
use tracing::debug;

use super::{payload_mismatch, Protocol, ProtocolExecutor};
use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::plan::{Payload, SqlKind, SqlPayload};

/// Executes an ordered batch of SQL statements against one database.
///
/// rusqlite is synchronous, so the batch runs on the blocking pool. A
/// cancelled context abandons the wait promptly; the statement already in
/// flight runs to completion on the blocking thread.
pub struct SqlExecutor;

impl SqlExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn run_statements(cfg: &SqlPayload) -> Result<()> {
    let conn = rusqlite::Connection::open(&cfg.database)?;

    for statement in &cfg.statements {
        match statement.kind {
            SqlKind::Execute => {
                conn.execute(&statement.query, [])?;
            }
            SqlKind::Query => {
                let mut stmt = conn.prepare(&statement.query)?;
                let mut rows = stmt.query([])?;
                let mut fetched = 0usize;
                while fetched < statement.max_rows && rows.next()?.is_some() {
                    fetched += 1;
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ProtocolExecutor for SqlExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Sql
    }

    fn description(&self) -> &str {
        "Run SQL statement batches against a SQLite database"
    }

    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()> {
        let Payload::Sql(cfg) = payload else {
            return Err(payload_mismatch(Protocol::Sql, payload));
        };

        let cfg = cfg.clone();
        let statements = cfg.statements.len();
        let work = tokio::task::spawn_blocking(move || run_statements(&cfg));

        ctx.run("running SQL statements", work)
            .await?
            .map_err(|e| Error::Execution(format!("SQL task panicked: {}", e)))??;

        debug!(statements, "batch finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SqlStatement;

    fn statement(query: &str, kind: SqlKind) -> SqlStatement {
        SqlStatement {
            query: query.to_string(),
            kind,
            max_rows: 1000,
        }
    }

    #[tokio::test]
    async fn test_execute_and_query_in_memory() {
        let executor = SqlExecutor::new();
        let ctx = RunContext::new();
        let payload = Payload::Sql(SqlPayload {
            database: ":memory:".into(),
            statements: vec![
                statement(
                    "CREATE TABLE hits (id INTEGER PRIMARY KEY, path TEXT)",
                    SqlKind::Execute,
                ),
                statement(
                    "INSERT INTO hits (path) VALUES ('/a'), ('/b')",
                    SqlKind::Execute,
                ),
                statement("SELECT * FROM hits", SqlKind::Query),
            ],
        });

        executor.execute(&ctx, &payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_statement_is_database_error() {
        let executor = SqlExecutor::new();
        let ctx = RunContext::new();
        let payload = Payload::Sql(SqlPayload {
            database: ":memory:".into(),
            statements: vec![statement("SELECT * FROM no_such_table", SqlKind::Query)],
        });

        let err = executor.execute(&ctx, &payload).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_max_rows_caps_the_scan() {
        let executor = SqlExecutor::new();
        let ctx = RunContext::new();
        let mut capped = statement("SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3", SqlKind::Query);
        capped.max_rows = 1;
        let payload = Payload::Sql(SqlPayload {
            database: ":memory:".into(),
            statements: vec![capped],
        });

        executor.execute(&ctx, &payload).await.unwrap();
    }
}
