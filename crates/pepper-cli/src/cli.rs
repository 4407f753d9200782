//! CLI argument definitions for pepper
//!
//! Uses clap for argument parsing. Every flag that configures the listener
//! can also be set from the environment.

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;

/// pepper - a personal filtering web proxy
///
/// Blocks tracking pixels and unwanted domains, and resolves keyword
/// searches typed into the browser's search box.
#[derive(Parser, Debug)]
#[command(name = "pepper")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Listen on the default address with the built-in search engine
    pepper

    # Load domain lists and search engines from a data file
    pepper --data ~/.config/pepper/data.json

    # Listen on all interfaces, block web bugs on first sight
    pepper --http 0.0.0.0:3128 --block-first-hit
")]
pub struct Cli {
    /// Address and port to listen on
    #[arg(long, env = "PEPPER_HTTP", default_value = "127.0.0.1:8080")]
    pub http: SocketAddr,

    /// JSON data file with Whitelist, Blacklist, Engines and Default
    #[arg(long, env = "PEPPER_DATA")]
    pub data: Option<PathBuf>,

    /// Host name under which the proxy serves its own pages
    #[arg(long, default_value = pepper_proxy::config::DEFAULT_VIRTUAL_HOST)]
    pub virtual_host: String,

    /// Seconds to wait for an upstream response
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fetch_timeout: u64,

    /// Serve the local pixel on the first detection of a web bug
    #[arg(long)]
    pub block_first_hit: bool,

    /// Maximum concurrent client connections (0 = unlimited)
    #[arg(long, default_value_t = 256)]
    pub max_connections: usize,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
