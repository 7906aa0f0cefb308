//! HTTP protocol executor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{payload_mismatch, Protocol, ProtocolExecutor};
use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::plan::Payload;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Executes one HTTP request per unit of work.
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout defaults: {}", e);
                Client::new()
            });
        Self { client }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolExecutor for HttpExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn description(&self) -> &str {
        "Issue HTTP requests (GET, POST, PUT, DELETE, PATCH)"
    }

    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()> {
        let Payload::Http(cfg) = payload else {
            return Err(payload_mismatch(Protocol::Http, payload));
        };

        let method = reqwest::Method::from_bytes(cfg.method.to_uppercase().as_bytes())
            .map_err(|_| Error::Execution(format!("invalid HTTP method '{}'", cfg.method)))?;

        let mut request = self.client.request(method, &cfg.url);
        if let Some(timeout) = cfg.timeout_seconds {
            request = request.timeout(Duration::from_secs(timeout));
        }
        for (name, value) in &cfg.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &cfg.body {
            request = request.json(body);
        }

        let response = ctx.run("sending HTTP request", request.send()).await??;
        let status = response.status();

        // Drain the body so keep-alive connections stay reusable.
        ctx.run("reading HTTP response", response.bytes()).await??;

        debug!(url = %cfg.url, status = status.as_u16(), "request finished");

        match cfg.expect_status {
            Some(expected) if status.as_u16() != expected => Err(Error::Execution(format!(
                "'{}' returned status {}, expected {}",
                cfg.url,
                status.as_u16(),
                expected
            ))),
            Some(_) => Ok(()),
            None if !status.is_success() => Err(Error::Execution(format!(
                "'{}' returned status {}",
                cfg.url,
                status.as_u16()
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{HttpPayload, KvPayload};
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload(url: &str, method: &str, expect_status: Option<u16>) -> Payload {
        Payload::Http(HttpPayload {
            url: url.to_string(),
            method: method.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout_seconds: None,
            expect_status,
        })
    }

    /// One-shot HTTP server that answers every request with 200 "ok".
    async fn serve_one() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                    )
                    .await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_successful_request() {
        let url = serve_one().await;
        let executor = HttpExecutor::new();
        let ctx = RunContext::new();

        executor
            .execute(&ctx, &payload(&url, "GET", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_status_is_execution_error() {
        let url = serve_one().await;
        let executor = HttpExecutor::new();
        let ctx = RunContext::new();

        let err = executor
            .execute(&ctx, &payload(&url, "GET", Some(204)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(err.to_string().contains("expected 204"));
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let executor = HttpExecutor::new();
        let ctx = RunContext::new();

        let err = executor
            .execute(&ctx, &payload("http://127.0.0.1:1", "NOT A METHOD", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid HTTP method"));
    }

    #[tokio::test]
    async fn test_payload_mismatch_is_structural() {
        let executor = HttpExecutor::new();
        let ctx = RunContext::new();
        let wrong = Payload::Kv(KvPayload {
            url: "redis://127.0.0.1".into(),
            ops: vec![],
        });

        let err = executor.execute(&ctx, &wrong).await.unwrap_err();
        assert_eq!(err.code(), "STRUCTURAL_ERROR");
    }
}
