//! Minimal HTTP/1.1 framing for the proxy.
//!
//! Requests are read from the client in full (head and `Content-Length`
//! body) so every pipeline stage can inspect them. Upstream responses are
//! only parsed as far as the header block; bodies are streamed.
//!
//! Every exchange is `Connection: close`: one request per client
//! connection.

use crate::error::{ProxyError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

/// Maximum total size of HTTP headers (64 KiB). Prevents OOM from
/// malicious clients or upstreams sending unbounded header data.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum request body size (16 MiB).
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// The write half a handler answers on.
pub type ClientWriter = dyn AsyncWrite + Send + Unpin;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// A fully-read client request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Request target as sent: absolute-form for proxied requests,
    /// origin-form for requests made directly to the proxy.
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a body-less request from its parts.
    #[must_use]
    pub fn new(method: &str, target: &str, headers: &[(&str, &str)]) -> Self {
        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    /// First header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the target is absolute-form (`http://host/path`).
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        let lower = self.target.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// The request URL.
    ///
    /// Absolute-form targets are parsed as-is; origin-form targets are
    /// resolved against the `Host` header.
    #[must_use]
    pub fn url(&self) -> Option<Url> {
        if self.is_absolute() {
            return Url::parse(&self.target).ok();
        }
        if !self.target.starts_with('/') {
            return None;
        }
        let host = self.header("host").unwrap_or("localhost");
        Url::parse(&format!("http://{}{}", host, self.target)).ok()
    }

    /// Destination host name without port, lowercased.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        self.url()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_lowercase()))
    }

    /// Whether this request is addressed to the proxy itself.
    #[must_use]
    pub fn is_local(&self, virtual_host: &str) -> bool {
        if !self.is_absolute() {
            return true;
        }
        self.host()
            .map(|h| h.eq_ignore_ascii_case(virtual_host))
            .unwrap_or(false)
    }

    /// First value of a query parameter, percent-decoded.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        })
    }
}

/// Scheme, host, port and path of `url` with the query dropped.
#[must_use]
pub fn canonical_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

/// Read a request head and its `Content-Length` body.
///
/// Returns `Ok(None)` when the client closed the connection before sending
/// anything. Oversized or unsupported requests yield
/// [`ProxyError::Rejected`] with the status to answer with.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut first_line = String::new();
    reader.read_line(&mut first_line).await?;
    if first_line.is_empty() {
        return Ok(None);
    }

    let (method, target, version) = parse_request_line(first_line.trim_end())?;

    let mut header_size = first_line.len();
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_size = header_size.saturating_add(n);
        if header_size > MAX_HEADER_SIZE {
            return Err(ProxyError::Rejected {
                status: 431,
                reason: "Request Header Fields Too Large",
            });
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut request = Request {
        method,
        target,
        version,
        headers,
        body: Vec::new(),
    };

    if request
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
    {
        return Err(ProxyError::Rejected {
            status: 411,
            reason: "Length Required",
        });
    }

    if let Some(len) = content_length(&request.headers)? {
        if len > MAX_REQUEST_BODY {
            return Err(ProxyError::Rejected {
                status: 413,
                reason: "Payload Too Large",
            });
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        request.body = body;
    }

    Ok(Some(request))
}

/// Parse an HTTP request line into (method, target, version).
pub fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 || !parts[2].starts_with("HTTP/") {
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {}",
            line
        )));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
    ))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn content_length(headers: &[(String, String)]) -> Result<Option<usize>> {
    match find_header(headers, "content-length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ProxyError::HttpParse(format!("invalid Content-Length: {}", value))),
        None => Ok(None),
    }
}

/// Serialize `request` for the upstream named by `url`.
///
/// The target is rewritten to origin-form, `Host` is set from the URL and
/// hop-by-hop headers are replaced with `Connection: close`.
#[must_use]
pub fn upstream_request_bytes(request: &Request, url: &Url) -> Vec<u8> {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let host = url.host_str().unwrap_or("");
    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", request.method, path, host_header);
    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !request.body.is_empty() || request.header("content-length").is_some() {
        head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(&request.body);
    bytes
}

/// Status line and headers of an upstream response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Length of the raw head including the blank line.
    pub raw_len: usize,
}

impl ResponseHead {
    /// First header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared `Content-Length`, if present and valid.
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        content_length(&self.headers).ok().flatten()
    }

    /// Whether the body uses chunked transfer coding.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

/// Read an upstream response head.
///
/// Returns the parsed head plus every byte read so far; the bytes after
/// `head.raw_len` are the start of the body.
pub async fn read_response_head<R>(reader: &mut R) -> Result<(ResponseHead, Vec<u8>)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::HttpParse(
                "upstream closed before sending a complete response head".to_string(),
            ));
        }
        let search_from = buf.len().saturating_sub(3);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_subsequence(&buf[search_from..], b"\r\n\r\n") {
            let raw_len = search_from + pos + 4;
            let head = parse_response_head(&buf[..raw_len], raw_len)?;
            return Ok((head, buf));
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Err(ProxyError::HttpParse(
                "upstream response head too large".to_string(),
            ));
        }
    }
}

fn parse_response_head(raw: &[u8], raw_len: usize) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or("");
    let status = parse_response_status(status_line.as_bytes()).ok_or_else(|| {
        ProxyError::HttpParse(format!("malformed status line: {}", status_line))
    })?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Ok(ResponseHead {
        status,
        headers,
        raw_len,
    })
}

/// Parse the 3-digit status code from the first response line.
#[must_use]
pub fn parse_response_status(data: &[u8]) -> Option<u16> {
    let line_end = data
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(data.len());
    let line = std::str::from_utf8(&data[..line_end.min(64)]).ok()?;

    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Canonical reason phrase for the statuses the proxy generates.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Write a complete response and flush.
pub async fn send_response(
    stream: &mut ClientWriter,
    status: u16,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Answer with `302 Found` pointing at `location`.
pub async fn send_redirect(stream: &mut ClientWriter, location: &str) -> Result<()> {
    send_response(stream, 302, &[("Location", location)], b"").await
}

/// Answer with a short plain-text error.
pub async fn send_error(stream: &mut ClientWriter, status: u16) -> Result<()> {
    let body = format!("{}\n", reason_phrase(status));
    send_response(
        stream,
        status,
        &[("Content-Type", "text/plain; charset=utf-8")],
        body.as_bytes(),
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) =
            parse_request_line("GET http://example.com/a?b=c HTTP/1.1").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "http://example.com/a?b=c");
        assert_eq!(version, "HTTP/1.1");
    }

    #[test]
    fn test_parse_request_line_malformed() {
        assert!(parse_request_line("GET").is_err());
        assert!(parse_request_line("GET / FTP/1.0").is_err());
        assert!(parse_request_line("").is_err());
    }

    #[test]
    fn test_absolute_request_host_and_locality() {
        let req = Request::new("GET", "http://Ads.Example.com:8080/t.gif?id=7", &[]);
        assert!(req.is_absolute());
        assert_eq!(req.host().as_deref(), Some("ads.example.com"));
        assert!(!req.is_local("pepper"));
        assert_eq!(req.query_param("id").as_deref(), Some("7"));
    }

    #[test]
    fn test_origin_form_is_local() {
        let req = Request::new("GET", "/search?q=a%20b", &[("Host", "127.0.0.1:8080")]);
        assert!(req.is_local("pepper"));
        assert_eq!(req.url().unwrap().path(), "/search");
        assert_eq!(req.query_param("q").as_deref(), Some("a b"));
    }

    #[test]
    fn test_virtual_host_is_local() {
        let req = Request::new("GET", "http://pepper/pixel.gif", &[]);
        assert!(req.is_local("pepper"));
        assert!(req.is_local("PEPPER"));
    }

    #[test]
    fn test_canonical_url_strips_query() {
        let url = Url::parse("http://ads.example.com/t.gif?uid=1&r=2").unwrap();
        assert_eq!(canonical_url(&url), "http://ads.example.com/t.gif");

        let url = Url::parse("http://127.0.0.1:9000/p.gif?x").unwrap();
        assert_eq!(canonical_url(&url), "http://127.0.0.1:9000/p.gif");
    }

    #[test]
    fn test_upstream_request_rewrites_target() {
        let mut req = Request::new(
            "POST",
            "http://example.com:8080/submit?a=1",
            &[
                ("Host", "example.com:8080"),
                ("Proxy-Connection", "keep-alive"),
                ("User-Agent", "test"),
                ("Content-Length", "2"),
            ],
        );
        req.body = b"hi".to_vec();
        let url = req.url().unwrap();
        let bytes = upstream_request_bytes(&req, &url);
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("POST /submit?a=1 HTTP/1.1\r\nHost: example.com:8080\r\n"));
        assert!(text.contains("User-Agent: test\r\n"));
        assert!(!text.contains("Proxy-Connection"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("Connection: close\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn test_read_request_with_body() {
        let raw = b"POST http://example.com/ HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(&raw[..]);
        let req = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.header("content-length"), Some("5"));
        assert_eq!(req.body, b"hello");
    }

    #[tokio::test]
    async fn test_read_request_empty_stream() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_rejects_chunked() {
        let raw = b"POST http://example.com/ HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProxyError::Rejected { status: 411, .. }));
    }

    #[tokio::test]
    async fn test_read_request_rejects_large_body() {
        let raw = format!(
            "POST http://example.com/ HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_BODY + 1
        );
        let mut reader = BufReader::new(raw.as_bytes());
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProxyError::Rejected { status: 413, .. }));
    }

    #[tokio::test]
    async fn test_read_response_head_splits_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/gif\r\nContent-Length: 3\r\n\r\nGIF";
        let mut reader = &raw[..];
        let (head, buf) = read_response_head(&mut reader).await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.header("content-type"), Some("image/gif"));
        assert_eq!(head.content_length(), Some(3));
        assert!(!head.is_chunked());
        assert_eq!(&buf[head.raw_len..], b"GIF");
    }

    #[tokio::test]
    async fn test_read_response_head_truncated() {
        let mut reader = &b"HTTP/1.1 200 OK\r\nContent-"[..];
        assert!(read_response_head(&mut reader).await.is_err());
    }

    #[test]
    fn test_parse_response_status() {
        assert_eq!(parse_response_status(b"HTTP/1.1 404 Not Found\r\n"), Some(404));
        assert_eq!(parse_response_status(b"garbage"), None);
        assert_eq!(parse_response_status(b""), None);
        assert_eq!(parse_response_status(b"HTTP/1.1 20"), None);
    }

    #[tokio::test]
    async fn test_send_redirect() {
        let mut out: Vec<u8> = Vec::new();
        send_redirect(&mut out, "http://pepper/pixel.gif").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("Location: http://pepper/pixel.gif\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }
}
