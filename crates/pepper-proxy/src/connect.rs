//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Checking the host against the domain filter
//! 2. Establishing a TCP connection to the upstream
//! 3. Returning `200 Connection Established`
//! 4. Relaying bytes in both directions
//!
//! The proxy never terminates TLS, so web-bug detection does not apply to
//! tunnelled traffic. The domain lists still do.

use crate::audit::{self, ProxyMode};
use crate::error::{ProxyError, Result};
use crate::http::{self, ClientWriter, Request};
use crate::upstream::UPSTREAM_CONNECT_TIMEOUT;
use pepper::DomainFilter;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Handle a CONNECT request already read from the client.
///
/// `reader` is the client's read half, positioned after the request head;
/// anything it still buffers is relayed upstream.
pub async fn handle_connect<R>(
    request: &Request,
    reader: &mut R,
    client: &mut ClientWriter,
    filter: &DomainFilter,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let (host, port) = parse_connect_target(&request.target)?;
    debug!("CONNECT request to {}:{}", host, port);

    let result = filter.check_host(&host);
    audit::log_domain_decision(ProxyMode::Connect, &host, &result);
    if !result.is_allowed() {
        http::send_error(client, 403).await?;
        return Err(ProxyError::HostDenied {
            host,
            reason: result.reason(),
        });
    }

    let mut upstream = match connect_with_timeout(&host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            http::send_error(client, 502).await?;
            return Err(e);
        }
    };

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    client.flush().await?;

    let (mut upstream_read, mut upstream_write) = upstream.split();
    let client_to_upstream = async {
        let copied = tokio::io::copy(&mut *reader, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
        copied
    };
    let upstream_to_client = async {
        let copied = tokio::io::copy(&mut upstream_read, &mut *client).await;
        let _ = client.shutdown().await;
        copied
    };
    let result = tokio::try_join!(client_to_upstream, upstream_to_client);
    debug!("CONNECT tunnel closed for {}:{}: {:?}", host, port, result);

    Ok(())
}

async fn connect_with_timeout(host: &str, port: u16) -> Result<TcpStream> {
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Parse the host and port from a CONNECT target (`host:port`).
///
/// The host is lowercased and IPv6 brackets are removed. A missing port
/// defaults to 443.
pub fn parse_connect_target(authority: &str) -> Result<(String, u16)> {
    if authority.is_empty() || authority.contains('/') {
        return Err(ProxyError::HttpParse(format!(
            "malformed CONNECT target: {}",
            authority
        )));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) if !host.ends_with(':') => {
            let port = port_str.parse::<u16>().map_err(|_| {
                ProxyError::HttpParse(format!("invalid port in CONNECT: {}", authority))
            })?;
            (host, port)
        }
        _ => (authority, 443),
    };

    let host = host.trim_matches(['[', ']']).to_lowercase();
    if host.is_empty() {
        return Err(ProxyError::HttpParse(format!(
            "missing host in CONNECT: {}",
            authority
        )));
    }
    Ok((host, port))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_connect_with_port() {
        let (host, port) = parse_connect_target("api.example.com:443").unwrap();
        assert_eq!(host, "api.example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_without_port() {
        let (host, port) = parse_connect_target("Example.COM").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_ipv6() {
        let (host, port) = parse_connect_target("[::1]:8443").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_parse_connect_malformed() {
        assert!(parse_connect_target("").is_err());
        assert!(parse_connect_target("/index.html").is_err());
        assert!(parse_connect_target("example.com:https").is_err());
        assert!(parse_connect_target(":443").is_err());
    }

    #[tokio::test]
    async fn test_denied_host_gets_403() {
        let filter = DomainFilter::new(&[], &[".example.com".to_string()]);
        let request = Request::new("CONNECT", "ads.example.com:443", &[]);
        let mut reader: &[u8] = b"";
        let mut out: Vec<u8> = Vec::new();

        let err = handle_connect(&request, &mut reader, &mut out, &filter)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::HostDenied { .. }));
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 403"));
    }

    #[tokio::test]
    async fn test_tunnel_relays_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let echo = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            sock.read_to_end(&mut received).await.unwrap();
            sock.write_all(b"pong").await.unwrap();
            received
        });

        let filter = DomainFilter::new(&[], &[]);
        let request = Request::new("CONNECT", &format!("127.0.0.1:{}", port), &[]);
        let mut reader: &[u8] = b"ping";
        let mut out: Vec<u8> = Vec::new();
        handle_connect(&request, &mut reader, &mut out, &filter)
            .await
            .unwrap();

        assert_eq!(echo.await.unwrap(), b"ping");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 Connection Established\r\n\r\npong"
        );
    }
}
