//! Request-line and URI parsing.

use crate::error::ProxyError;

/// Origin coordinates extracted from a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub host: String,
    /// Path with its leading slash stripped; the forwarder prepends one
    /// unconditionally.
    pub path: String,
    pub port: u16,
}

/// Parses a `"GET <uri> HTTP/x.y"` request line. Non-GET methods are
/// refused, any version token is accepted.
pub fn parse_request_line(line: &str) -> Result<RequestTarget, ProxyError> {
    let mut fields = line.split_whitespace();
    let (Some(method), Some(uri), Some(_version)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(ProxyError::BadRequest(
            "invalid syntax for GET request".to_string(),
        ));
    };

    if !method.eq_ignore_ascii_case("GET") {
        return Err(ProxyError::NotImplemented(method.to_string()));
    }

    Ok(parse_uri(uri))
}

/// Splits a URI into host, path and port. Any `scheme://` prefix is
/// discarded. The port counts only when the colon precedes the first slash
/// and defaults to 80; a missing path becomes the empty string.
pub fn parse_uri(uri: &str) -> RequestTarget {
    let rest = match uri.find("://") {
        Some(at) => &uri[at + 3..],
        None => uri,
    };

    let (authority, path) = match rest.find('/') {
        Some(at) => (&rest[..at], &rest[at + 1..]),
        None => (rest, ""),
    };

    let (host, port) = match authority.find(':') {
        Some(at) => (&authority[..at], lenient_port(&authority[at + 1..])),
        None => (authority, 80),
    };

    RequestTarget {
        host: host.to_string(),
        path: path.to_string(),
        port,
    }
}

/// Leading-digits port parse. Anything unusable maps to port 0, which
/// surfaces later as a failed origin connect rather than a parse error.
fn lenient_port(s: &str) -> u16 {
    let digits: &str = {
        let end = s
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(s.len(), |(at, _)| at);
        &s[..end]
    };
    digits.parse().unwrap_or(0)
}
