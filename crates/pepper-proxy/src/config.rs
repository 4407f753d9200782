//! Proxy configuration types.
//!
//! Defines the listener settings, the domain lists, the keyword search
//! engines and the web-bug detector knobs.

use pepper::SearchEngine;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Host name under which the proxy serves its own pages.
pub const DEFAULT_VIRTUAL_HOST: &str = "pepper";

/// Configuration for the proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default)]
    pub bind_port: u16,

    /// Host name that addresses the proxy itself (default: "pepper").
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    /// Domain patterns that are always allowed. Checked first.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Domain patterns that are rejected with 403 unless whitelisted.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Keyword search engines.
    #[serde(default)]
    pub engines: Vec<SearchEngine>,

    /// Keyword of the engine used when a query has no known keyword.
    /// `None` selects the built-in DuckDuckGo engine.
    #[serde(default)]
    pub default_engine: Option<String>,

    /// Third-party search URL prefixes that are redirected to the local
    /// search page.
    #[serde(default = "default_hijack_prefixes")]
    pub hijack_prefixes: Vec<String>,

    /// Upper bound for a web-bug probe and for the wait on a forwarded
    /// response's first byte.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Serve the local pixel as soon as a web bug is first detected instead
    /// of letting that first response through.
    #[serde(default)]
    pub block_first_hit: bool,

    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: 0,
            virtual_host: default_virtual_host(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            engines: Vec::new(),
            default_engine: None,
            hijack_prefixes: default_hijack_prefixes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            block_first_hit: false,
            max_connections: default_max_connections(),
        }
    }
}

impl ProxyConfig {
    /// Fetch timeout as a [`Duration`].
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// URL of the local pixel endpoint.
    #[must_use]
    pub fn pixel_url(&self) -> String {
        format!("http://{}/pixel.gif", self.virtual_host)
    }

    /// URL of the local search page.
    #[must_use]
    pub fn search_url(&self) -> String {
        format!("http://{}/search", self.virtual_host)
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

fn default_virtual_host() -> String {
    DEFAULT_VIRTUAL_HOST.to_string()
}

fn default_hijack_prefixes() -> Vec<String> {
    vec!["http://www.bing.com/search".to_string()]
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> usize {
    256
}
