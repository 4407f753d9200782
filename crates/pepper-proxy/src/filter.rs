//! Domain filtering stage.
//!
//! Wraps the core [`DomainFilter`] and answers 403 for blacklisted hosts
//! before anything else touches the network. Requests addressed to the
//! proxy itself are never filtered.

use crate::audit::{self, ProxyMode};
use crate::error::Result;
use crate::http::{self, ClientWriter, Request};
use crate::pipeline::Handler;
use async_trait::async_trait;
use pepper::{DomainFilter, FilterResult};
use tracing::debug;

/// Pipeline stage enforcing the whitelist/blacklist.
pub struct DomainFilterStage {
    next: Box<dyn Handler>,
    filter: DomainFilter,
    virtual_host: String,
}

impl DomainFilterStage {
    #[must_use]
    pub fn new(next: Box<dyn Handler>, filter: DomainFilter, virtual_host: &str) -> Self {
        Self {
            next,
            filter,
            virtual_host: virtual_host.to_string(),
        }
    }

    /// Classify a host and record the decision in the audit log.
    #[must_use]
    pub fn check(&self, mode: ProxyMode, host: &str) -> FilterResult {
        let result = self.filter.check_host(host);
        audit::log_domain_decision(mode, host, &result);
        result
    }
}

#[async_trait]
impl Handler for DomainFilterStage {
    async fn handle(&self, request: &Request, client: &mut ClientWriter) -> Result<()> {
        if request.is_local(&self.virtual_host) {
            return self.next.handle(request, client).await;
        }
        let Some(host) = request.host() else {
            debug!("No destination host for {}", request.target);
            return self.next.handle(request, client).await;
        };

        let result = self.check(ProxyMode::Forward, &host);
        if !result.is_allowed() {
            debug!("Denied {}: {}", host, result.reason());
            return http::send_error(client, 403).await;
        }

        self.next.handle(request, client).await
    }
}
