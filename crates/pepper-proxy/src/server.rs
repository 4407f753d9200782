//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server accepts TCP connections, reads one request per connection and
//! dispatches it:
//!
//! CONNECT method -> [`connect`] tunnel
//! Other methods  -> the interception [`Pipeline`]
//!
//! If the client aborts the connection while the pipeline is still working
//! (typically waiting on an upstream), the pipeline future is dropped and its
//! upstream connection closed with it. A clean EOF is only a half-close: the
//! client may still be waiting for the response, so dispatch continues and
//! a vanished client surfaces as a failed write instead.

use crate::config::ProxyConfig;
use crate::connect;
use crate::error::{ProxyError, Result};
use crate::http::{self, ClientWriter};
use crate::pipeline::Pipeline;
use pepper::{DomainFilter, WebBugStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Handle returned when the proxy server starts.
///
/// Drop the handle or call [`ProxyHandle::shutdown`] to stop accepting
/// connections.
pub struct ProxyHandle {
    /// The actual port the proxy is listening on
    pub port: u16,
    store: Arc<WebBugStore>,
    /// Send `true` to trigger graceful shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyHandle {
    /// Signal the proxy to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The live web-bug store.
    #[must_use]
    pub fn store(&self) -> &Arc<WebBugStore> {
        &self.store
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    pipeline: Pipeline,
    /// Domain lists, applied to CONNECT tunnels.
    filter: DomainFilter,
    max_connections: usize,
    /// Active connection count for connection limiting.
    active_connections: AtomicUsize,
}

/// Start the proxy server.
///
/// Binds to `config.bind_addr:config.bind_port` (port 0 = OS-assigned),
/// assembles the pipeline and begins accepting connections on the current
/// runtime.
pub async fn start(config: ProxyConfig) -> Result<ProxyHandle> {
    let pipeline = Pipeline::builder(&config).build()?;

    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    let port = local_addr.port();

    info!("Proxy server listening on {}", local_addr);

    let store = Arc::clone(pipeline.store());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(ProxyState {
        pipeline,
        filter: DomainFilter::new(&config.whitelist, &config.blacklist),
        max_connections: config.max_connections,
        active_connections: AtomicUsize::new(0),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(ProxyHandle {
        port,
        store,
        shutdown_tx,
    })
}

/// Accept loop: listen for connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let max = state.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max, addr);
                                drop(stream);
                                continue;
                            }
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);

                        debug!("Accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state).await {
                                debug!("Connection handler error: {}", e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Proxy server shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(stream: TcpStream, state: &ProxyState) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match http::read_request(&mut reader).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(ProxyError::Rejected { status, reason }) => {
            debug!("Rejecting request: {}", reason);
            return http::send_error(&mut write_half, status).await;
        }
        Err(ProxyError::HttpParse(msg)) => {
            debug!("Malformed request: {}", msg);
            return http::send_error(&mut write_half, 400).await;
        }
        Err(e) => return Err(e),
    };

    if request.method == "CONNECT" {
        return connect::handle_connect(&request, &mut reader, &mut write_half, &state.filter)
            .await;
    }

    let client: &mut ClientWriter = &mut write_half;
    tokio::select! {
        result = state.pipeline.dispatch(&request, client) => result?,
        () = client_aborted(&mut reader) => {
            debug!("Client aborted connection during {} {}", request.method, request.target);
            return Ok(());
        }
    }

    write_half.shutdown().await?;
    Ok(())
}

/// Resolves once reading from the client fails (connection reset).
///
/// Never resolves after a clean EOF.
async fn client_aborted<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return std::future::pending().await,
            Ok(_) => {}
            Err(_) => return,
        }
    }
}
