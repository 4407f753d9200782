//! Web-bug detector stage.
//!
//! The first request for an unknown URL is probed by the detector itself:
//! if the origin answers with a small 1×1 GIF, the URL's canonical form
//! (query stripped) joins the shared blacklist. Later requests for a
//! blacklisted URL are redirected to the proxy's own pixel without
//! touching the origin.
//!
//! Probe failures never block traffic: the request continues down the
//! chain as if detection had not run.

use crate::audit;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::http::{self, canonical_url, ClientWriter, Request};
use crate::pipeline::Handler;
use crate::upstream::Upstream;
use async_trait::async_trait;
use pepper::webbug::is_web_bug;
use pepper::WebBugStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pipeline stage detecting and suppressing tracking pixels.
pub struct WebBugDetector {
    next: Box<dyn Handler>,
    store: Arc<WebBugStore>,
    upstream: Upstream,
    virtual_host: String,
    pixel_url: String,
    block_first_hit: bool,
}

impl WebBugDetector {
    #[must_use]
    pub fn new(
        next: Box<dyn Handler>,
        store: Arc<WebBugStore>,
        upstream: Upstream,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            next,
            store,
            upstream,
            virtual_host: config.virtual_host.clone(),
            pixel_url: config.pixel_url(),
            block_first_hit: config.block_first_hit,
        }
    }

    async fn serve_pixel(&self, key: &str, client: &mut ClientWriter) -> Result<()> {
        let hits = self.store.record_hit();
        audit::log_webbug_redirected(key, hits);
        http::send_redirect(client, &self.pixel_url).await
    }
}

#[async_trait]
impl Handler for WebBugDetector {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        if request.method != "GET" || request.is_local(&self.virtual_host) {
            return self.next.handle(request, client).await;
        }
        let Some(url) = request.url() else {
            return self.next.handle(request, client).await;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return self.next.handle(request, client).await;
        }

        let key = canonical_url(&url);
        if self.store.contains(&key) {
            return self.serve_pixel(&key, client).await;
        }

        match self.upstream.probe(&url, request.header("user-agent")).await {
            Ok(probe) => {
                let detected = probe
                    .small_gif_body
                    .as_deref()
                    .map(|body| is_web_bug(probe.content_type.as_deref(), body))
                    .unwrap_or(false);

                if detected {
                    if self.store.insert(&key) {
                        audit::log_webbug_blacklisted(&key);
                    }
                    if self.block_first_hit {
                        return self.serve_pixel(&key, client).await;
                    }
                } else if probe.small_gif_body.is_some() {
                    debug!("Small GIF at {} is not a web bug", key);
                }
            }
            Err(e) => {
                warn!("Web-bug probe failed for {}: {}", key, e);
            }
        }

        self.next.handle(request, client).await
    }
}
