//! Raw network protocol executor (TCP/UDP).

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use super::{payload_mismatch, Protocol, ProtocolExecutor};
use crate::engine::RunContext;
use crate::error::{Error, Result};
use crate::plan::{NetPayload, Payload, Transport};

const REPLY_BUF_SIZE: usize = 4096;

/// Opens a raw connection, optionally sends a payload and reads one reply.
pub struct NetExecutor;

impl NetExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NetExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetExecutor {
    async fn run_tcp(&self, ctx: &RunContext, cfg: &NetPayload) -> Result<()> {
        let mut stream = ctx
            .run("connecting over TCP", TcpStream::connect(&cfg.addr))
            .await??;

        if let Some(data) = &cfg.send {
            ctx.run("sending over TCP", stream.write_all(data.as_bytes()))
                .await??;
        }

        if cfg.expect_reply {
            let mut buf = [0u8; REPLY_BUF_SIZE];
            let n = ctx.run("reading TCP reply", stream.read(&mut buf)).await??;
            if n == 0 {
                return Err(Error::Execution(format!(
                    "'{}' closed the connection without a reply",
                    cfg.addr
                )));
            }
            debug!(addr = %cfg.addr, bytes = n, "reply received");
        }
        Ok(())
    }

    async fn run_udp(&self, ctx: &RunContext, cfg: &NetPayload) -> Result<()> {
        let socket = ctx
            .run("binding UDP socket", UdpSocket::bind("0.0.0.0:0"))
            .await??;
        ctx.run("connecting over UDP", socket.connect(&cfg.addr))
            .await??;

        let data = cfg.send.as_deref().unwrap_or_default();
        ctx.run("sending over UDP", socket.send(data.as_bytes()))
            .await??;

        if cfg.expect_reply {
            let mut buf = [0u8; REPLY_BUF_SIZE];
            let n = ctx
                .run("reading UDP reply", socket.recv(&mut buf))
                .await??;
            debug!(addr = %cfg.addr, bytes = n, "reply received");
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolExecutor for NetExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Net
    }

    fn description(&self) -> &str {
        "Open raw TCP/UDP connections, optionally sending and reading bytes"
    }

    async fn execute(&self, ctx: &RunContext, payload: &Payload) -> Result<()> {
        let Payload::Net(cfg) = payload else {
            return Err(payload_mismatch(Protocol::Net, payload));
        };

        match cfg.transport {
            Transport::Tcp => self.run_tcp(ctx, cfg).await,
            Transport::Udp => self.run_udp(ctx, cfg).await,
        }
    }
}
