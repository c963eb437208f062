//! Per-connection worker: the request pipeline.
//!
//! One worker owns one client socket for its whole life. It reads the
//! request line, probes the cache, and either answers from memory or opens
//! an origin connection, rewrites the headers on the way through, and tees
//! the response body into a capped buffer for insertion. Every exit path
//! drops both sockets and the buffer; nothing a worker does can reach the
//! accept loop.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::cache::{ObjectKey, SharedCache, MAX_OBJECT_SIZE};
use crate::error::{send_error_page, ProxyError};
use crate::headers::{drain_client_headers, relay_client_headers, write_proxy_headers};
use crate::request::{parse_request_line, RequestTarget};

/// Streaming chunk size for bodies, both directions.
const CHUNK: usize = 8192;

/// Entry point of a worker thread. Failures end this connection and
/// nothing else.
pub(crate) fn handle_client(stream: TcpStream, cache: &SharedCache) {
    let peer = stream.peer_addr().ok();
    match process(stream, cache) {
        Ok(()) => debug!(?peer, "connection done"),
        Err(err) => debug!(?peer, %err, "connection ended early"),
    }
}

fn process(stream: TcpStream, cache: &SharedCache) -> io::Result<()> {
    let mut client = BufReader::new(stream.try_clone()?);
    let mut out = stream;

    let mut line = Vec::new();
    let n = client.read_until(b'\n', &mut line)?;
    if n <= 2 {
        let err = ProxyError::BadRequest("every line must end with \\r\\n".to_string());
        warn!(%err, "rejecting request");
        return send_error_page(&mut out, &err, "GET");
    }

    let line = String::from_utf8_lossy(&line);
    let target = match parse_request_line(&line) {
        Ok(target) => target,
        Err(err) => {
            warn!(%err, "rejecting request");
            return send_error_page(&mut out, &err, line.trim_end());
        }
    };
    debug!(host = %target.host, path = %target.path, port = target.port, "parsed request");

    let key = ObjectKey {
        host: target.host.clone(),
        path: target.path.clone(),
        port: target.port,
    };

    if let Some(data) = cache.lookup(&key) {
        debug!(bytes = data.len(), "cache hit");
        drain_client_headers(&mut client)?;
        return write_in_chunks(&mut out, &data);
    }
    debug!("cache miss, contacting origin");

    match forward(&mut client, &mut out, &target, key, cache) {
        Ok(()) => Ok(()),
        Err(ProxyError::ClientGone(err)) => {
            // Nobody left to tell; exit quietly.
            debug!(%err, "client hung up mid-response");
            Ok(())
        }
        Err(err) => {
            warn!(%err, "forwarding failed");
            send_error_page(&mut out, &err, line.trim_end())
        }
    }
}

/// The miss path: origin connect, request synthesis, header rewrite, body
/// streaming with the cache tee, and the insert.
fn forward(
    client: &mut BufReader<TcpStream>,
    out: &mut TcpStream,
    target: &RequestTarget,
    key: ObjectKey,
    cache: &SharedCache,
) -> Result<(), ProxyError> {
    let mut origin =
        TcpStream::connect((target.host.as_str(), target.port)).map_err(ProxyError::Connect)?;

    // The slash is prepended unconditionally; the parser stripped it.
    write!(origin, "GET /{} HTTP/1.0\r\n", target.path).map_err(ProxyError::Stream)?;
    let host_given = relay_client_headers(client, &mut origin).map_err(ProxyError::Stream)?;
    write_proxy_headers(&mut origin, host_given, &target.host).map_err(ProxyError::Stream)?;
    origin.write_all(b"\r\n").map_err(ProxyError::Stream)?;

    let mut body = Vec::new();
    let mut poisoned = false;
    let mut total = 0_usize;
    let mut buf = [0_u8; CHUNK];

    loop {
        let n = origin.read(&mut buf).map_err(ProxyError::Stream)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(ProxyError::ClientGone)?;
        total += n;

        if !poisoned {
            if body.len() + n <= MAX_OBJECT_SIZE {
                body.extend_from_slice(&buf[..n]);
            } else {
                poisoned = true;
                body = Vec::new();
            }
        }
    }
    out.flush().map_err(ProxyError::ClientGone)?;

    if poisoned {
        debug!(total, "response exceeds the object cap, not cached");
    } else {
        info!(host = %key.host, path = %key.path, bytes = body.len(), "caching origin response");
        cache.insert(key, body);
    }
    Ok(())
}

fn write_in_chunks<W: Write>(to: &mut W, data: &[u8]) -> io::Result<()> {
    for chunk in data.chunks(CHUNK) {
        to.write_all(chunk)?;
    }
    to.flush()
}
