//! Intercepting HTTP proxy for pepper.
//!
//! Every plain HTTP request runs through one fixed [`Pipeline`]:
//!
//! 1. **Search hijack** (`hijack`) - Searches on a configured third-party
//!    engine are redirected to the proxy's own search page.
//!
//! 2. **Domain filter** (`filter`) - Blacklisted hosts get 403 unless a
//!    whitelist pattern matches first.
//!
//! 3. **Web-bug detector** (`webbug`) - URLs that serve a 1×1 GIF are
//!    remembered and later redirected to the proxy's own pixel.
//!
//! 4. **Router** - Requests for the virtual host are served by the local
//!    site (`local`); everything else is forwarded upstream (`forward`).
//!
//! CONNECT requests bypass the pipeline and become host-filtered TCP
//! tunnels (`connect`).

pub mod audit;
pub mod config;
pub mod connect;
pub mod error;
pub mod filter;
pub mod forward;
pub mod hijack;
pub mod http;
pub mod local;
pub mod pipeline;
pub mod server;
pub mod upstream;
pub mod webbug;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use pipeline::{Handler, Pipeline};
pub use server::{start, ProxyHandle};
