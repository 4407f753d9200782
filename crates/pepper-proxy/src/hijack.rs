//! Search-engine hijacking.
//!
//! Some browsers cannot be pointed at a custom search engine. For those, a
//! search on a known third-party engine (Bing by default) is redirected to
//! the proxy's own search page, which applies keyword resolution.

use crate::audit;
use crate::error::Result;
use crate::http::{self, ClientWriter, Request};
use crate::pipeline::Handler;
use async_trait::async_trait;

/// Redirects configured search URL prefixes to the local search page.
pub struct SearchHijack {
    next: Box<dyn Handler>,
    prefixes: Vec<String>,
    search_url: String,
}

impl SearchHijack {
    #[must_use]
    pub fn new(next: Box<dyn Handler>, prefixes: &[String], search_url: &str) -> Self {
        Self {
            next,
            prefixes: prefixes
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            search_url: search_url.to_string(),
        }
    }

    /// The local search URL for `request`, if it should be hijacked.
    #[must_use]
    pub fn rewrite(&self, request: &Request) -> Option<String> {
        if !self.prefixes.iter().any(|p| request.target.starts_with(p)) {
            return None;
        }
        let query = request.query_param("q").unwrap_or_default();
        Some(format!(
            "{}?q={}",
            self.search_url,
            urlencoding::encode(&query)
        ))
    }
}

#[async_trait]
impl Handler for SearchHijack {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        match self.rewrite(request) {
            Some(location) => {
                audit::log_search_hijacked(&request.target);
                http::send_redirect(client, &location).await
            }
            None => self.next.handle(request, client).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Handler for Unreachable {
        async fn handle(&self, _request: &Request, _client: &mut ClientWriter) -> Result<()> {
            panic!("hijacked request must not be delegated");
        }
    }

    fn hijack() -> SearchHijack {
        SearchHijack::new(
            Box::new(Unreachable),
            &["http://www.bing.com/search".to_string()],
            "http://pepper/search",
        )
    }

    #[test]
    fn test_rewrite_matching_prefix() {
        let req = Request::new("GET", "http://www.bing.com/search?q=w+borrow&form=QBLH", &[]);
        assert_eq!(
            hijack().rewrite(&req).as_deref(),
            Some("http://pepper/search?q=w%20borrow")
        );
    }

    #[test]
    fn test_rewrite_without_query() {
        let req = Request::new("GET", "http://www.bing.com/search", &[]);
        assert_eq!(
            hijack().rewrite(&req).as_deref(),
            Some("http://pepper/search?q=")
        );
    }

    #[test]
    fn test_other_urls_untouched() {
        let req = Request::new("GET", "http://www.bing.com/images?q=cat", &[]);
        assert!(hijack().rewrite(&req).is_none());
        let req = Request::new("GET", "http://example.com/search?q=cat", &[]);
        assert!(hijack().rewrite(&req).is_none());
    }

    #[tokio::test]
    async fn test_handle_redirects() {
        let req = Request::new("GET", "http://www.bing.com/search?q=rust", &[]);
        let mut out: Vec<u8> = Vec::new();
        hijack().handle(&req, &mut out).await.ok();
        let text = String::from_utf8(out).unwrap_or_default();
        assert!(text.contains("Location: http://pepper/search?q=rust\r\n"));
    }
}
