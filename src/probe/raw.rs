//! Last-resort probe over a raw socket.
//!
//! Writes a minimal `HEAD` request line by hand and looks for `200` in the
//! first bytes of the status line. Survives servers that refuse structured
//! client requests but still answer on the socket.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use super::ProbeError;
use crate::tls;

/// Bytes of the response inspected for the status code.
const STATUS_PEEK_BYTES: u64 = 12;

/// Run the raw probe against every address `url`'s host resolves to.
///
/// Returns true on the first address whose status line contains `200`.
pub async fn run_raw_probe(url: &Url, timeout: Duration) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let secure = url.scheme() == "https";
    let port = url
        .port_or_known_default()
        .unwrap_or(if secure { 443 } else { 80 });
    let path = if url.path().is_empty() { "/" } else { url.path() };

    let addrs: Vec<SocketAddr> =
        match tokio::time::timeout(timeout, tokio::net::lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                tracing::debug!("Raw probe: DNS resolution failed for {}: {}", host, e);
                return false;
            }
            Err(_) => {
                tracing::debug!("Raw probe: DNS resolution timed out for {}", host);
                return false;
            }
        };

    let request = head_request(host, path);

    for addr in addrs {
        match probe_address(addr, host, secure, &request, timeout).await {
            Ok(true) => return true,
            Ok(false) => tracing::debug!("Raw probe: {} ({}) did not answer 200", host, addr),
            Err(e) => tracing::debug!("Raw probe: {} ({}) failed: {}", host, addr, e),
        }
    }

    false
}

fn head_request(host: &str, path: &str) -> String {
    format!(
        "HEAD {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    )
}

async fn probe_address(
    addr: SocketAddr,
    host: &str,
    secure: bool,
    request: &str,
    timeout: Duration,
) -> Result<bool, ProbeError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let head = if secure {
        let mut stream = tls::handshake(stream, host, timeout)
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        exchange(&mut stream, request, timeout).await?
    } else {
        let mut stream = stream;
        exchange(&mut stream, request, timeout).await?
    };

    Ok(status_line_is_ok(&head))
}

async fn exchange<S>(stream: &mut S, request: &str, timeout: Duration) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let fut = async {
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut head = Vec::with_capacity(STATUS_PEEK_BYTES as usize);
        (&mut *stream).take(STATUS_PEEK_BYTES).read_to_end(&mut head).await?;
        Ok::<_, std::io::Error>(head)
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(e.to_string()))
}

/// True when the first line of `head` contains the literal `200`.
fn status_line_is_ok(head: &[u8]) -> bool {
    let first_line = match head.windows(2).position(|w| w == b"\r\n") {
        Some(end) => &head[..end],
        None => head,
    };
    first_line.windows(3).any(|w| w == b"200")
}
