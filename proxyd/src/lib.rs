//! A concurrent HTTP/1.0 caching forward proxy.
//!
//! The proxy accepts GET requests, rewrites a fixed set of request headers
//! on the way to the origin, streams the response back verbatim, and keeps
//! recently fetched objects in a byte-budgeted LRU cache shared across all
//! worker threads under a readers-preferred readers/writers gate.
//!
//! Scheduling is one detached OS thread per accepted connection; all
//! connection state is thread-local except the cache. The accept loop polls
//! a shutdown flag between (non-blocking) accepts so that SIGINT can drain
//! the process from a plain signal handler that does nothing but store a
//! boolean.

pub mod cache;
mod conn;
pub mod error;
pub mod gate;
pub mod headers;
pub mod request;

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{SharedCache, MAX_CACHE_SIZE};

/// Set by the SIGINT handler; the accept loop notices, drains and exits.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// A bound proxy: the listener plus the cache its workers share.
pub struct Proxy {
    listener: TcpListener,
    cache: Arc<SharedCache>,
}

impl Proxy {
    /// Binds the listening socket. Port 0 lets the OS pick one, which
    /// [`local_addr`](Proxy::local_addr) then reports.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Proxy {
            listener,
            cache: Arc::new(SharedCache::new(MAX_CACHE_SIZE)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// The accept loop: one detached worker per connection, until the
    /// shutdown flag flips. Per-connection failures are logged and never
    /// reach this loop; only a broken listener ends it early.
    pub fn run(&self) -> io::Result<()> {
        self.listener.set_nonblocking(true)?;
        let addr = self.local_addr()?;
        info!(%addr, "proxy listening");

        while !SHUTDOWN.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    // Accepted sockets do not reliably inherit blocking
                    // mode from the listener.
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!(%err, "could not configure accepted socket");
                        continue;
                    }
                    let cache = Arc::clone(&self.cache);
                    thread::spawn(move || conn::handle_client(stream, &cache));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) => {
                    warn!(%err, "could not accept client connection");
                }
            }
        }

        info!(
            hits = self.cache.hits(),
            misses = self.cache.misses(),
            cached_bytes = self.cache.total_size(),
            "shutting down, flushing cache"
        );
        self.cache.clear();
        Ok(())
    }
}
