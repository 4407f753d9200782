//! Outbound connections to origin servers.
//!
//! [`Upstream`] owns the shared TLS connector and the timeouts. It is used
//! by the web-bug detector to probe unknown URLs and by the forward stage
//! to relay requests.

use crate::error::{ProxyError, Result};
use crate::http::{self, Request, ResponseHead};
use pepper::webbug::{is_gif_content_type, WEB_BUG_MAX_BYTES};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

/// Timeout for upstream TCP connect.
pub(crate) const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A byte stream to an origin server, plain or TLS.
pub trait UpstreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> UpstreamIo for T {}

/// An upstream response whose head has been read.
pub struct OpenResponse {
    pub head: ResponseHead,
    /// Every byte read so far, head included.
    pub buffered: Vec<u8>,
    pub stream: Box<dyn UpstreamIo>,
}

/// What a web-bug probe learned about a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub status: u16,
    pub content_type: Option<String>,
    /// The complete body, only present for small GIF responses.
    pub small_gif_body: Option<Vec<u8>>,
}

/// Connector for origin servers.
#[derive(Clone)]
pub struct Upstream {
    tls_connector: TlsConnector,
    fetch_timeout: Duration,
}

impl Upstream {
    /// Build a connector with the webpki root store.
    ///
    /// The root cert store is expensive to construct, so one connector is
    /// shared by every connection task.
    pub fn new(fetch_timeout: Duration) -> Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Config(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
            fetch_timeout,
        })
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Open a connection to the origin of `url`.
    pub async fn connect(&self, url: &Url) -> Result<Box<dyn UpstreamIo>> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ProxyError::HttpParse(format!(
                    "unsupported URL scheme: {}",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::HttpParse(format!("missing host in URL: {}", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::HttpParse(format!("unknown port for URL: {}", url)))?;

        let addr = format!("{}:{}", host, port);
        let tcp = match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(ProxyError::UpstreamConnect {
                    host: host.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ProxyError::UpstreamConnect {
                    host: host.to_string(),
                    reason: "connection timed out".to_string(),
                });
            }
        };

        if !tls {
            return Ok(Box::new(tcp));
        }

        let name = host.trim_matches(['[', ']']).to_string();
        let server_name = rustls::pki_types::ServerName::try_from(name).map_err(|_| {
            ProxyError::UpstreamConnect {
                host: host.to_string(),
                reason: "invalid server name for TLS".to_string(),
            }
        })?;
        let tls_stream = self
            .tls_connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                host: host.to_string(),
                reason: format!("TLS handshake failed: {}", e),
            })?;
        Ok(Box::new(tls_stream))
    }

    /// Send `request` to `url` and wait for the response head.
    ///
    /// Bounded by the fetch timeout; the body is left on the stream.
    pub async fn open(&self, request: &Request, url: &Url) -> Result<OpenResponse> {
        let host = url.host_str().unwrap_or("").to_string();
        let secs = self.fetch_timeout.as_secs();
        tokio::time::timeout(self.fetch_timeout, self.open_inner(request, url))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout { host, secs })?
    }

    async fn open_inner(&self, request: &Request, url: &Url) -> Result<OpenResponse> {
        let mut stream = self.connect(url).await?;
        stream
            .write_all(&http::upstream_request_bytes(request, url))
            .await?;
        stream.flush().await?;

        let (head, buffered) = http::read_response_head(&mut stream).await?;
        Ok(OpenResponse {
            head,
            buffered,
            stream,
        })
    }

    /// Fetch `url` far enough to tell whether it is a web bug.
    ///
    /// Bodies are only read for responses that declare `image/gif` and are
    /// smaller than the web-bug threshold; everything else is abandoned
    /// after the head.
    pub async fn probe(&self, url: &Url, user_agent: Option<&str>) -> Result<Probe> {
        let mut headers = vec![("Accept", "*/*")];
        if let Some(ua) = user_agent {
            headers.push(("User-Agent", ua));
        }
        let request = Request::new("GET", url.as_str(), &headers);

        let host = url.host_str().unwrap_or("").to_string();
        let secs = self.fetch_timeout.as_secs();
        tokio::time::timeout(self.fetch_timeout, self.probe_inner(&request, url))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout { host, secs })?
    }

    async fn probe_inner(&self, request: &Request, url: &Url) -> Result<Probe> {
        let OpenResponse {
            head,
            buffered,
            mut stream,
        } = self.open_inner(request, url).await?;

        let content_type = head.header("content-type").map(str::to_string);
        let mut probe = Probe {
            status: head.status,
            content_type: content_type.clone(),
            small_gif_body: None,
        };

        if !content_type.as_deref().map(is_gif_content_type).unwrap_or(false) {
            return Ok(probe);
        }
        if head.is_chunked() {
            debug!("Skipping chunked GIF body from {}", url);
            return Ok(probe);
        }

        let declared = head.content_length();
        if declared.map(|len| len >= WEB_BUG_MAX_BYTES).unwrap_or(false) {
            return Ok(probe);
        }

        // Without Content-Length, read until EOF but never past the threshold.
        let limit = declared.unwrap_or(WEB_BUG_MAX_BYTES);
        let mut body = buffered[head.raw_len..].to_vec();
        body.truncate(limit);
        let mut chunk = [0u8; WEB_BUG_MAX_BYTES];
        while body.len() < limit {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let take = n.min(limit - body.len());
            body.extend_from_slice(&chunk[..take]);
        }

        if declared.is_none() && body.len() >= WEB_BUG_MAX_BYTES {
            return Ok(probe);
        }

        probe.small_gif_body = Some(body);
        Ok(probe)
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one canned response per connection, forever.
    async fn serve(response: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock.write_all(&response).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        port
    }

    fn gif_response(body: &[u8], with_length: bool) -> Vec<u8> {
        let mut head = "HTTP/1.1 200 OK\r\nContent-Type: image/gif\r\n".to_string();
        if with_length {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn upstream() -> Upstream {
        Upstream::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_small_gif() {
        let port = serve(gif_response(&pepper::PIXEL_GIF, true)).await;
        let url = Url::parse(&format!("http://127.0.0.1:{}/t.gif?x=1", port)).unwrap();

        let probe = upstream().probe(&url, None).await.unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.small_gif_body.as_deref(), Some(&pepper::PIXEL_GIF[..]));
    }

    #[tokio::test]
    async fn test_probe_small_gif_without_length() {
        let port = serve(gif_response(&pepper::PIXEL_GIF, false)).await;
        let url = Url::parse(&format!("http://127.0.0.1:{}/t.gif", port)).unwrap();

        let probe = upstream().probe(&url, Some("test-agent")).await.unwrap();
        assert_eq!(probe.small_gif_body.as_deref(), Some(&pepper::PIXEL_GIF[..]));
    }

    #[tokio::test]
    async fn test_probe_large_gif_skips_body() {
        let body = vec![0u8; 500];
        let port = serve(gif_response(&body, true)).await;
        let url = Url::parse(&format!("http://127.0.0.1:{}/big.gif", port)).unwrap();

        let probe = upstream().probe(&url, None).await.unwrap();
        assert!(probe.small_gif_body.is_none());
    }

    #[tokio::test]
    async fn test_probe_non_gif_skips_body() {
        let port = serve(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\n\r\nhi".to_vec()).await;
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

        let probe = upstream().probe(&url, None).await.unwrap();
        assert_eq!(probe.content_type.as_deref(), Some("text/html"));
        assert!(probe.small_gif_body.is_none());
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{}/t.gif", port)).unwrap();
        let err = upstream().probe(&url, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnect { .. }));
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        // Accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let upstream = Upstream::new(Duration::from_millis(200)).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/slow.gif", port)).unwrap();
        let err = upstream.probe(&url, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(upstream().connect(&url).await.is_err());
    }
}
