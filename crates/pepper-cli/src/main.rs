//! pepper CLI - personal filtering web proxy
//!
//! Parses flags, loads the data file and runs the proxy until Ctrl-C.

mod cli;
mod config;

use clap::Parser;
use cli::Cli;
use pepper_proxy::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(cli.verbose))
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("pepper: {}", e);
        std::process::exit(1);
    }
}

/// `-v`/`-vv` take precedence over `RUST_LOG`.
fn env_filter(verbose: u8) -> EnvFilter {
    match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::build(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let handle = pepper_proxy::start(config).await?;
        info!("pepper listening on {}:{}", cli.http.ip(), handle.port);

        tokio::signal::ctrl_c().await?;
        handle.shutdown();
        info!("{} web bugs blocked this session", handle.store().hits());
        Ok(())
    })
}
