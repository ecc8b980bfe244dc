//! TCP listener and per-connection request loop.
//!
//! Each connection gets its own thread; all of them share one
//! `SpreadsheetServices`. Requests and responses are single JSON lines.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use cellgraph_config::ServerConfig;
use cellgraph_protocol::{parse_request, ErrorKind, MalformedRequest, Response};
use cellgraph_service::SpreadsheetServices;
use cellgraph_store::CellStore;

use crate::dispatch::dispatch;

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Per-connection limits, taken from the server config.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_line_bytes: usize,
    pub max_parse_failures: u32,
    pub max_connections: usize,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_line_bytes: config.max_line_bytes,
            max_parse_failures: config.max_parse_failures,
            max_connections: config.max_connections,
        }
    }
}

/// Counters for debugging and monitoring.
#[derive(Clone, Default)]
pub struct ServerMetrics {
    pub requests_handled: Arc<AtomicU64>,
    /// Connections closed due to parse failure limit.
    pub connections_closed_parse_failures: Arc<AtomicU64>,
    /// Connections closed due to an oversized line.
    pub connections_closed_oversize: Arc<AtomicU64>,
    /// Connections refused due to connection limit.
    pub connections_refused_limit: Arc<AtomicU64>,
}

/// A running listener. Dropping it stops accepting new connections.
pub struct Server {
    listener_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    metrics: ServerMetrics,
}

impl Server {
    /// Bind `config.bind` and start accepting connections on a background thread.
    pub fn start<S>(config: &ServerConfig, services: Arc<SpreadsheetServices<S>>) -> io::Result<Self>
    where
        S: CellStore + 'static,
    {
        let listener = TcpListener::bind(&config.bind)?;
        let addr = listener.local_addr()?;

        // Non-blocking so the loop can notice the shutdown flag
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let metrics = ServerMetrics::default();
        let limits = Limits::from(config);

        let listener_handle = {
            let shutdown = Arc::clone(&shutdown);
            let active = Arc::clone(&active);
            let metrics = metrics.clone();
            thread::spawn(move || run_listener(listener, services, limits, shutdown, active, metrics))
        };

        info!("cellgraph server listening on {}", addr);

        Ok(Self {
            listener_handle: Some(listener_handle),
            shutdown,
            bound_addr: addr,
            active,
            metrics,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Block until the listener exits (an accept error or `stop` from elsewhere).
    pub fn wait(mut self) {
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.join();
        }
    }

    /// Stop accepting connections. Open connections finish on their own.
    pub fn stop(&mut self) {
        let Some(handle) = self.listener_handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = handle.join();
        info!("cellgraph server on {} stopped", self.bound_addr);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decrements the live connection count when a handler thread ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_listener<S>(
    listener: TcpListener,
    services: Arc<SpreadsheetServices<S>>,
    limits: Limits,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    metrics: ServerMetrics,
) where
    S: CellStore + 'static,
{
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let open = active.load(Ordering::SeqCst);
                if open >= limits.max_connections {
                    warn!("Connection refused from {}: limit of {} reached", addr, limits.max_connections);
                    metrics.connections_refused_limit.fetch_add(1, Ordering::Relaxed);
                    drop(stream);
                    continue;
                }

                debug!("Accepted connection from {}", addr);
                active.fetch_add(1, Ordering::SeqCst);
                let guard = ConnectionGuard(Arc::clone(&active));
                let services = Arc::clone(&services);
                let conn_metrics = metrics.clone();

                thread::spawn(move || {
                    let _guard = guard;
                    if let Err(e) = handle_connection(stream, &services, limits, &conn_metrics) {
                        warn!("Connection error from {}: {}", addr, e);
                    }
                    debug!("Connection from {} closed", addr);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Serve one client until it disconnects or breaks a limit.
fn handle_connection<S: CellStore>(
    mut stream: TcpStream,
    services: &SpreadsheetServices<S>,
    limits: Limits,
    metrics: &ServerMetrics,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_secs(10)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut parse_failures: u32 = 0;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // One byte past the limit is enough to tell an oversized line apart
        let read = (&mut reader)
            .take(limits.max_line_bytes as u64 + 1)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(());
        }

        let line = trim_line_ending(&buf);
        if line.len() > limits.max_line_bytes {
            let message = format!("request line exceeds {} bytes", limits.max_line_bytes);
            send_response(&mut stream, &Response::error(None, ErrorKind::BadReq, message))?;
            warn!("Peer sent an oversized line, disconnecting");
            metrics.connections_closed_oversize.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let parsed = match std::str::from_utf8(line) {
            Ok(text) => parse_request(text),
            Err(_) => Err(MalformedRequest {
                id: None,
                message: "request is not valid UTF-8".to_string(),
            }),
        };

        match parsed {
            Ok(request) => {
                parse_failures = 0;
                let response = dispatch(services, request);
                metrics.requests_handled.fetch_add(1, Ordering::Relaxed);
                send_response(&mut stream, &response)?;
            }
            Err(bad) => {
                parse_failures += 1;
                debug!("Malformed request ({}/{}): {}", parse_failures, limits.max_parse_failures, bad.message);
                send_response(&mut stream, &Response::error(bad.id, ErrorKind::BadReq, bad.message))?;

                if parse_failures >= limits.max_parse_failures {
                    warn!("Peer exceeded parse failure limit, disconnecting");
                    metrics.connections_closed_parse_failures.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        }
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

fn send_response(stream: &mut TcpStream, response: &Response) -> io::Result<()> {
    let json = serde_json::to_string(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(stream, "{}", json)?;
    stream.flush()
}
