//! Core policies for the pepper browsing proxy.
//!
//! This crate holds the synchronous, I/O-free parts of pepper:
//!
//! - [`net_filter`] - Whitelist/blacklist domain filtering with exact,
//!   root-domain and subdomain pattern matching.
//! - [`search`] - Keyword search engines: the first word of a query picks
//!   the engine, the rest becomes the search term.
//! - [`webbug`] - Detection of 1×1 tracking GIFs and the shared blacklist
//!   of URLs confirmed to serve them.
//!
//! Networking lives in `pepper-proxy`, which threads these types through its
//! interception pipeline.

pub mod error;
pub mod net_filter;
pub mod search;
pub mod webbug;

pub use error::{PepperError, Result};
pub use net_filter::{dns_domain_is, DomainFilter, FilterResult};
pub use search::{SearchEngine, SearchEngineRegistry};
pub use webbug::{WebBugStore, PIXEL_GIF};
