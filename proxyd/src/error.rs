//! Failure taxonomy and the client-facing error page.
//!
//! Every failure is scoped to the connection that caused it: the worker
//! reports the mapped status to its own client and dies; the accept loop
//! never sees any of this.

use std::io::{self, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request line could not be understood. Maps to 400.
    #[error("{0}")]
    BadRequest(String),

    /// Any method other than GET. Maps to 501.
    #[error("proxy only supports the GET method, not {0}")]
    NotImplemented(String),

    /// DNS or TCP failure reaching the origin. Maps to 502.
    #[error("proxy could not connect to the origin: {0}")]
    Connect(#[source] io::Error),

    /// The origin leg broke mid-request or mid-response. Maps to 502.
    #[error("proxy lost the origin connection: {0}")]
    Stream(#[source] io::Error),

    /// The client leg broke while the response was streaming. There is no
    /// one left to report to; the worker just exits.
    #[error("client connection lost: {0}")]
    ClientGone(#[source] io::Error),
}

impl ProxyError {
    /// HTTP status code and reason phrase for this failure.
    pub fn status(&self) -> (&'static str, &'static str) {
        match self {
            ProxyError::BadRequest(_) => ("400", "Bad Request"),
            ProxyError::NotImplemented(_) => ("501", "Not Implemented"),
            ProxyError::Connect(_) | ProxyError::Stream(_) | ProxyError::ClientGone(_) => {
                ("502", "Bad Gateway")
            }
        }
    }
}

/// Writes the minimal HTML error page for `err`, naming `cause` (the
/// offending method or request) in the body.
pub fn send_error_page<W: Write>(to: &mut W, err: &ProxyError, cause: &str) -> io::Result<()> {
    let (code, short) = err.status();
    let body = format!(
        "<html><title>Proxy Error</title><body bgcolor=\"ffffff\">\r\n\
         {code}: {short}\r\n\
         <p>{err}: {cause}\r\n\
         <hr><em>proxyd</em>\r\n</body></html>"
    );

    write!(
        to,
        "HTTP/1.0 {code} {short}\r\nContent-type: text/html\r\nContent-length: {}\r\n\r\n",
        body.len()
    )?;
    to.write_all(body.as_bytes())?;
    to.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1() {
        assert_eq!(
            ProxyError::BadRequest("nope".into()).status(),
            ("400", "Bad Request")
        );
        assert_eq!(
            ProxyError::NotImplemented("PUT".into()).status(),
            ("501", "Not Implemented")
        );
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ProxyError::Connect(io_err).status(), ("502", "Bad Gateway"));
    }

    #[test]
    fn test_2() {
        let mut page = Vec::new();
        let err = ProxyError::NotImplemented("PUT".into());
        send_error_page(&mut page, &err, "PUT").unwrap();

        let text = String::from_utf8(page).unwrap();
        assert!(text.starts_with("HTTP/1.0 501 Not Implemented\r\n"));
        assert!(text.contains("Content-type: text/html"));
        assert!(text.contains("501: Not Implemented"));
        assert!(text.contains("PUT"));

        // Content-length matches the body that follows the blank line.
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let len_line = head
            .lines()
            .find(|l| l.starts_with("Content-length"))
            .unwrap();
        let declared: usize = len_line.split(": ").nth(1).unwrap().parse().unwrap();
        assert_eq!(declared, body.len());
    }
}
