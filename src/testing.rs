//! Shared fixtures for unit tests.

use crate::notify::Notifier;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A request received by the fixture server.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Canned response for the fixture server.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// Start a plain HTTP/1.1 server on a random local port.
///
/// Every connection is answered once by `handler` and then closed. Received
/// requests are forwarded on the returned channel.
pub async fn spawn_http_server<F>(
    handler: F,
) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>)
where
    F: Fn(&CapturedRequest) -> Reply + Send + Sync + 'static,
{
    let (addr, rx, _) = spawn_flaky_http_server(0, handler).await;
    (addr, rx)
}

/// Like [`spawn_http_server`], but the first `drop_first` connections are
/// closed without a response. The returned counter tracks every accepted
/// connection, dropped or answered.
pub async fn spawn_flaky_http_server<F>(
    drop_first: usize,
    handler: F,
) -> (
    SocketAddr,
    mpsc::UnboundedReceiver<CapturedRequest>,
    Arc<AtomicUsize>,
)
where
    F: Fn(&CapturedRequest) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if accepted.fetch_add(1, Ordering::SeqCst) < drop_first {
                drop(stream);
                continue;
            }
            let handler = handler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, handler.as_ref(), tx).await;
            });
        }
    });

    (addr, rx, connections)
}

async fn serve_one<F>(
    mut stream: TcpStream,
    handler: &F,
    tx: mpsc::UnboundedSender<CapturedRequest>,
) -> std::io::Result<()>
where
    F: Fn(&CapturedRequest) -> Reply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let request = CapturedRequest { method, path, body };
    let reply = handler(&request);
    let is_head = request.method == "HEAD";
    let _ = tx.send(request);

    let mut response = format!(
        "HTTP/1.1 {} Fixture\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.body.len()
    );
    if !is_head {
        response.push_str(&reply.body);
    }
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Notifier that keeps every message in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
