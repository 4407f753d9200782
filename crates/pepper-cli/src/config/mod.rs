//! Configuration module for the pepper CLI
//!
//! Loads the JSON data file and merges it with command line flags into a
//! [`ProxyConfig`]. Flags always win over the data file.
//!
//! ```json
//! {
//!   "Whitelist": ["cdn.example.com"],
//!   "Blacklist": [".doubleclick.net"],
//!   "Engines": [{"URL": "https://en.wikipedia.org/w/index.php?search=%s",
//!                "Title": "Wikipedia", "Keyword": "w"}],
//!   "Default": "w"
//! }
//! ```

use crate::cli::Cli;
use pepper::SearchEngine;
use pepper_proxy::{ProxyConfig, ProxyError, Result};
use serde::Deserialize;
use std::path::Path;

/// Contents of the data file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct DataFile {
    #[serde(default, alias = "Whitelist")]
    pub whitelist: Vec<String>,

    #[serde(default, alias = "Blacklist")]
    pub blacklist: Vec<String>,

    #[serde(default, alias = "Engines")]
    pub engines: Vec<SearchEngine>,

    /// Keyword of the fallback engine
    #[serde(default, rename = "default", alias = "Default")]
    pub default_engine: Option<String>,
}

/// Read and parse a data file.
pub fn load(path: &Path) -> Result<DataFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Build the proxy configuration from the flags and the optional data file.
pub fn build(cli: &Cli) -> Result<ProxyConfig> {
    let data = match &cli.data {
        Some(path) => load(path)?,
        None => DataFile::default(),
    };

    Ok(ProxyConfig {
        bind_addr: cli.http.ip(),
        bind_port: cli.http.port(),
        virtual_host: cli.virtual_host.to_lowercase(),
        whitelist: data.whitelist,
        blacklist: data.blacklist,
        engines: data.engines,
        default_engine: data.default_engine,
        fetch_timeout_secs: cli.fetch_timeout,
        block_first_hit: cli.block_first_hit,
        max_connections: cli.max_connections,
        ..Default::default()
    })
}
