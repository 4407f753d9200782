//! Terminal forward stage.
//!
//! Sends the client's request to its original destination and streams the
//! response back without buffering. Only hop-by-hop headers are rewritten
//! on the way out; the response is relayed byte for byte.

use crate::audit::{self, ProxyMode};
use crate::error::{ProxyError, Result};
use crate::http::{self, ClientWriter, Request};
use crate::pipeline::Handler;
use crate::upstream::{OpenResponse, Upstream};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Forwards requests upstream.
pub struct Forwarder {
    upstream: Upstream,
}

impl Forwarder {
    #[must_use]
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl Handler for Forwarder {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        let Some(url) = request.url() else {
            return http::send_error(client, 400).await;
        };
        debug!("Forwarding {} {}", request.method, url);

        let OpenResponse {
            head,
            buffered,
            mut stream,
        } = match self.upstream.open(request, &url).await {
            Ok(response) => response,
            Err(e @ ProxyError::UpstreamTimeout { .. }) => {
                warn!("Upstream timed out: {}", e);
                return http::send_error(client, 504).await;
            }
            Err(e) => {
                warn!("Upstream request failed: {}", e);
                return http::send_error(client, 502).await;
            }
        };

        client.write_all(&buffered).await?;

        let mut response_buf = [0u8; 8192];
        loop {
            let n = match stream.read(&mut response_buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Upstream read error: {}", e);
                    break;
                }
            };
            client.write_all(&response_buf[..n]).await?;
        }
        client.flush().await?;

        audit::log_forward(ProxyMode::Forward, &request.method, url.as_str(), head.status);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_forward_relays_response_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let upstream_response =
            b"HTTP/1.1 201 Created\r\nX-Origin: yes\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let canned = upstream_response.clone();
        let received = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&canned).await.unwrap();
            sock.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let forwarder = Forwarder::new(Upstream::new(Duration::from_secs(5)).unwrap());
        let request = Request::new(
            "GET",
            &format!("http://127.0.0.1:{}/page?x=1", port),
            &[("Proxy-Connection", "keep-alive"), ("Accept", "text/html")],
        );
        let mut out: Vec<u8> = Vec::new();
        forwarder.handle(&request, &mut out).await.unwrap();

        assert_eq!(out, upstream_response);
        let sent = received.await.unwrap();
        assert!(sent.starts_with("GET /page?x=1 HTTP/1.1\r\n"));
        assert!(sent.contains("Accept: text/html\r\n"));
        assert!(!sent.contains("Proxy-Connection"));
    }

    #[tokio::test]
    async fn test_forward_unreachable_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = Forwarder::new(Upstream::new(Duration::from_secs(5)).unwrap());
        let request = Request::new("GET", &format!("http://127.0.0.1:{}/", port), &[]);
        let mut out: Vec<u8> = Vec::new();
        forwarder.handle(&request, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 502"));
    }

    #[tokio::test]
    async fn test_forward_timeout_is_gateway_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let forwarder = Forwarder::new(Upstream::new(Duration::from_millis(200)).unwrap());
        let request = Request::new("GET", &format!("http://127.0.0.1:{}/", port), &[]);
        let mut out: Vec<u8> = Vec::new();
        forwarder.handle(&request, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 504"));
    }
}
