//! Audit logging for proxy decisions.
//!
//! Every policy decision is logged with structured fields via `tracing`
//! under the `pepper_proxy::audit` target. Request bodies and headers are
//! never logged.

use pepper::FilterResult;
use tracing::info;

/// Stage that produced an audit event.
#[derive(Debug, Clone, Copy)]
pub enum ProxyMode {
    /// Plain HTTP request forwarded upstream
    Forward,
    /// CONNECT tunnel
    Connect,
    /// Request served by the proxy's own virtual host
    Local,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Forward => write!(f, "forward"),
            ProxyMode::Connect => write!(f, "connect"),
            ProxyMode::Local => write!(f, "local"),
        }
    }
}

/// Log a domain filter decision.
pub fn log_domain_decision(mode: ProxyMode, host: &str, result: &FilterResult) {
    info!(
        target: "pepper_proxy::audit",
        mode = %mode,
        host = host,
        decision = result.decision(),
        pattern = result.pattern().unwrap_or(""),
        "domain filter decision"
    );
}

/// Log a URL newly confirmed as a web bug.
pub fn log_webbug_blacklisted(url: &str) {
    info!(
        target: "pepper_proxy::audit",
        url = url,
        action = "blacklisted",
        "web bug detected"
    );
}

/// Log a request redirected to the local pixel.
pub fn log_webbug_redirected(url: &str, hits: u64) {
    info!(
        target: "pepper_proxy::audit",
        url = url,
        action = "redirected",
        hits = hits,
        "web bug blocked"
    );
}

/// Log a search request rewritten to the local search page.
pub fn log_search_hijacked(target_uri: &str) {
    info!(
        target: "pepper_proxy::audit",
        uri = target_uri,
        "search request hijacked"
    );
}

/// Log a completed forward with its upstream status.
pub fn log_forward(mode: ProxyMode, method: &str, url: &str, status: u16) {
    info!(
        target: "pepper_proxy::audit",
        mode = %mode,
        method = method,
        url = url,
        status = status,
        "proxy response"
    );
}
