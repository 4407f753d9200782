//! The interception pipeline.
//!
//! Every request passes through the same fixed chain of stages:
//!
//! ```text
//! SearchHijack -> DomainFilterStage -> WebBugDetector -> Router
//!                                                         |-> LocalSite (virtual host)
//!                                                         `-> Forwarder (everything else)
//! ```
//!
//! Each stage implements [`Handler`] and owns the next handler in the chain.
//! A stage either answers the client itself (redirect, 403, pixel) or
//! delegates. Order matters: hijacked searches always point at the proxy
//! and must not reach the filter, and a blocked host must never be fetched
//! by the detector.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::filter::DomainFilterStage;
use crate::forward::Forwarder;
use crate::hijack::SearchHijack;
use crate::http::{ClientWriter, Request};
use crate::local::LocalSite;
use crate::upstream::Upstream;
use crate::webbug::WebBugDetector;
use async_trait::async_trait;
use pepper::{DomainFilter, SearchEngineRegistry, WebBugStore};
use std::sync::Arc;

/// A pipeline stage or terminal handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle `request`, writing the response to `client` or delegating.
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()>;
}

/// Terminal stage: the proxy's own site or the upstream forwarder.
pub struct Router {
    virtual_host: String,
    local: LocalSite,
    forward: Forwarder,
}

impl Router {
    #[must_use]
    pub fn new(virtual_host: &str, local: LocalSite, forward: Forwarder) -> Self {
        Self {
            virtual_host: virtual_host.to_string(),
            local,
            forward,
        }
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        if request.is_local(&self.virtual_host) {
            self.local.handle(request, client).await
        } else {
            self.forward.handle(request, client).await
        }
    }
}

/// The assembled chain.
pub struct Pipeline {
    head: Box<dyn Handler>,
    store: Arc<WebBugStore>,
}

impl Pipeline {
    /// Start building a pipeline from `config`.
    #[must_use]
    pub fn builder(config: &ProxyConfig) -> PipelineBuilder<'_> {
        PipelineBuilder {
            config,
            store: None,
            upstream: None,
        }
    }

    /// Run `request` through every stage.
    pub async fn dispatch(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        self.head.handle(request, client).await
    }

    /// The web-bug store shared by the detector and the search page.
    #[must_use]
    pub fn store(&self) -> &Arc<WebBugStore> {
        &self.store
    }
}

/// Threads the shared store, registry and connector into each stage.
pub struct PipelineBuilder<'a> {
    config: &'a ProxyConfig,
    store: Option<Arc<WebBugStore>>,
    upstream: Option<Upstream>,
}

impl PipelineBuilder<'_> {
    /// Use an existing store instead of a fresh one.
    #[must_use]
    pub fn store(mut self, store: Arc<WebBugStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing upstream connector.
    #[must_use]
    pub fn upstream(mut self, upstream: Upstream) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Validate the configuration and assemble the chain.
    ///
    /// Fails on a malformed search engine template or an unknown default
    /// engine keyword.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        if config.fetch_timeout_secs == 0 {
            return Err(ProxyError::Config(
                "fetch timeout must be at least one second".to_string(),
            ));
        }
        let store = self.store.unwrap_or_default();
        let upstream = match self.upstream {
            Some(upstream) => upstream,
            None => Upstream::new(config.fetch_timeout())?,
        };

        let registry = SearchEngineRegistry::with_default_keyword(
            config.engines.clone(),
            config.default_engine.as_deref(),
        )?;
        let filter = DomainFilter::new(&config.whitelist, &config.blacklist);

        let router = Router::new(
            &config.virtual_host,
            LocalSite::new(Arc::new(registry), Arc::clone(&store)),
            Forwarder::new(upstream.clone()),
        );
        let detector = WebBugDetector::new(
            Box::new(router),
            Arc::clone(&store),
            upstream,
            config,
        );
        let filter_stage =
            DomainFilterStage::new(Box::new(detector), filter, &config.virtual_host);
        let hijack = SearchHijack::new(
            Box::new(filter_stage),
            &config.hijack_prefixes,
            &config.search_url(),
        );

        Ok(Pipeline {
            head: Box::new(hijack),
            store,
        })
    }
}
