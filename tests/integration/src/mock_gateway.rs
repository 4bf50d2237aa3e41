//! Scriptable mock gateway
//!
//! Accepts WebSocket connections and hands each one, with its ordinal, to
//! a test-provided script. Helpers cover the server side of the protocol:
//! Hello, reading client frames (acking heartbeats transparently), READY
//! and RESUMED, dispatches, and close codes.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// A mock gateway listening on localhost
pub struct MockGateway {
    addr: SocketAddr,
    _accept_loop: JoinHandle<()>,
}

impl MockGateway {
    /// Spawn a gateway whose connections run `script(ordinal, conn)`
    ///
    /// The ordinal counts connections from zero, letting a script answer
    /// the first connection with a fresh handshake and a reconnection
    /// differently.
    pub async fn spawn<F, Fut>(script: F) -> Result<Self>
    where
        F: Fn(usize, GatewayConn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let accept_loop = tokio::spawn(async move {
            let mut ordinal = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let conn = GatewayConn { ws };
                let fut = script(ordinal, conn);
                ordinal += 1;
                tokio::spawn(async move {
                    if let Err(err) = fut.await {
                        eprintln!("mock gateway script failed: {err:#}");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            _accept_loop: accept_loop,
        })
    }

    /// WebSocket URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

/// One accepted connection, driven by a test script
pub struct GatewayConn {
    ws: WebSocketStream<TcpStream>,
}

impl GatewayConn {
    pub async fn send_json(&mut self, frame: &Value) -> Result<()> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send the Hello frame that opens every connection
    pub async fn hello(&mut self, heartbeat_interval_ms: u64) -> Result<()> {
        self.send_json(&json!({
            "op": 10,
            "d": { "heartbeat_interval": heartbeat_interval_ms },
            "s": null,
            "t": null
        }))
        .await
    }

    /// Read frames until one with the given opcode arrives
    ///
    /// Heartbeats received along the way are acknowledged transparently,
    /// so scripts never race the client's heartbeat task.
    pub async fn expect_op(&mut self, op: u64) -> Result<Value> {
        loop {
            let frame = self.recv_json().await?;
            let got = frame["op"].as_u64().context("frame without opcode")?;
            if got == op {
                return Ok(frame);
            }
            if got == 1 {
                self.send_json(&json!({ "op": 11, "d": null, "s": null, "t": null }))
                    .await?;
                continue;
            }
            bail!("expected op {op}, got frame {frame}");
        }
    }

    /// Complete a fresh handshake with READY at sequence `seq`
    pub async fn ready(&mut self, session_id: &str, seq: u64) -> Result<()> {
        self.send_json(&json!({
            "op": 0,
            "t": "READY",
            "s": seq,
            "d": { "session_id": session_id }
        }))
        .await
    }

    /// Complete a resume handshake with RESUMED at sequence `seq`
    pub async fn resumed(&mut self, seq: u64) -> Result<()> {
        self.send_json(&json!({ "op": 0, "t": "RESUMED", "s": seq, "d": {} }))
            .await
    }

    /// Send a dispatch frame
    pub async fn dispatch(&mut self, event_type: &str, seq: u64, payload: Value) -> Result<()> {
        self.send_json(&json!({ "op": 0, "t": event_type, "s": seq, "d": payload }))
            .await
    }

    /// Ask the client to reconnect (op 5)
    pub async fn request_reconnect(&mut self) -> Result<()> {
        self.send_json(&json!({ "op": 5, "d": null, "s": null, "t": null }))
            .await
    }

    /// Invalidate the client's session (op 7)
    pub async fn invalid_session(&mut self, resumable: bool) -> Result<()> {
        self.send_json(&json!({ "op": 7, "d": resumable, "s": null, "t": null }))
            .await
    }

    /// Close the connection with a protocol close code
    pub async fn close(mut self, code: u16) -> Result<()> {
        self.ws
            .send(Message::Close(Some(CloseFrame {
                code: code.into(),
                reason: "".into(),
            })))
            .await?;
        let _ = self.ws.close(None).await;
        Ok(())
    }

    /// Keep the connection alive (acking heartbeats) until the client
    /// closes or the transport drops
    pub async fn serve_until_close(mut self) -> Result<()> {
        loop {
            match self.ws.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text)?;
                    if frame["op"].as_u64() == Some(1) {
                        self.send_json(&json!({ "op": 11, "d": null, "s": null, "t": null }))
                            .await?;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) => return Ok(()),
            }
        }
    }

    /// Hold the connection open without acknowledging anything until the
    /// client drops it; heartbeats go deliberately unanswered
    pub async fn ignore_until_close(mut self) -> Result<()> {
        loop {
            match self.ws.next().await {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn recv_json(&mut self) -> Result<Value> {
        loop {
            match self.ws.next().await {
                None => bail!("client closed the connection"),
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    bail!("client sent close frame: {frame:?}")
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}
