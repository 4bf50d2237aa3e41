//! Canned-response mock REST server
//!
//! Serves a fixed sequence of responses over plain HTTP/1.1 and records
//! the request heads it saw, so tests can assert on auth headers and
//! retry behavior without a real API.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One scripted HTTP response
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// A mock REST API on localhost serving scripted responses in order
pub struct MockRest {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    _accept_loop: JoinHandle<()>,
}

impl MockRest {
    pub async fn spawn(responses: Vec<CannedResponse>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        let accept_loop = tokio::spawn(async move {
            let mut remaining = responses.into_iter();
            while let Ok((mut stream, _)) = listener.accept().await {
                let Ok(head) = read_head(&mut stream).await else {
                    continue;
                };
                seen.lock().unwrap().push(head);

                let response = remaining.next().unwrap_or(CannedResponse::json(404, "{}"));
                let mut wire = format!(
                    "HTTP/1.1 {} MockRest\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                    response.status,
                    response.body.len()
                );
                for (name, value) in &response.headers {
                    wire.push_str(&format!("{name}: {value}\r\n"));
                }
                wire.push_str("\r\n");
                wire.push_str(&response.body);

                let _ = stream.write_all(wire.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Ok(Self {
            addr,
            requests,
            _accept_loop: accept_loop,
        })
    }

    /// Base URL clients should be configured with
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request heads observed so far (request line plus headers)
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Read one request head (through the blank line); bodies are not needed
/// for the routes these tests exercise
async fn read_head(stream: &mut tokio::net::TcpStream) -> Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
