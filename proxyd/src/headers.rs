//! Client-header relay and the proxy's own header block.

use std::io::{self, BufRead, Write};

/// Header fields the proxy strips from the client request because it
/// supplies its own versions.
const DROPPED: [&str; 5] = [
    "User-Agent",
    "Accept",
    "Accept-Encoding",
    "Connection",
    "Proxy-Connection",
];

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3";
pub const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const ACCEPT_ENCODING: &str = "gzip, deflate";

/// Streams the client's header lines to the origin verbatim, skipping the
/// [`DROPPED`] fields. Stops at the blank terminator line (which is not
/// forwarded). Returns whether the client supplied a `Host` header.
///
/// A line shorter than the two-byte terminator means the client hung up
/// mid-headers and is reported as `UnexpectedEof`.
pub fn relay_client_headers<R: BufRead, W: Write>(
    client: &mut R,
    origin: &mut W,
) -> io::Result<bool> {
    let mut host_given = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = client.read_until(b'\n', &mut line)?;
        if n < 2 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client headers ended before the blank line",
            ));
        }
        if n == 2 {
            break;
        }

        if let Some(colon) = line.iter().position(|&b| b == b':') {
            let name = trim_trailing_space(&line[..colon]);
            if name.eq_ignore_ascii_case(b"Host") {
                host_given = true;
            }
            if DROPPED
                .iter()
                .any(|dropped| name.eq_ignore_ascii_case(dropped.as_bytes()))
            {
                continue;
            }
        }

        origin.write_all(&line)?;
    }

    Ok(host_given)
}

/// Drains and discards the client's remaining header lines; used on the
/// cache-hit path where the origin never hears from us.
pub fn drain_client_headers<R: BufRead>(client: &mut R) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if client.read_until(b'\n', &mut line)? <= 2 {
            return Ok(());
        }
    }
}

/// Writes the proxy's own header block: `Host` when the client omitted it,
/// then the fixed browser identity and the two close directives. The blank
/// terminator line is the caller's business.
pub fn write_proxy_headers<W: Write>(
    origin: &mut W,
    host_given: bool,
    host: &str,
) -> io::Result<()> {
    if !host_given {
        write!(origin, "Host: {host}\r\n")?;
    }
    write!(origin, "User-Agent: {USER_AGENT}\r\n")?;
    write!(origin, "Accept: {ACCEPT}\r\n")?;
    write!(origin, "Accept-Encoding: {ACCEPT_ENCODING}\r\n")?;
    origin.write_all(b"Connection: close\r\n")?;
    origin.write_all(b"Proxy-Connection: close\r\n")?;
    Ok(())
}

fn trim_trailing_space(name: &[u8]) -> &[u8] {
    let end = name
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |at| at + 1);
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn relay(input: &str) -> (bool, String) {
        let mut client = Cursor::new(input.as_bytes().to_vec());
        let mut origin = Vec::new();
        let host = relay_client_headers(&mut client, &mut origin).unwrap();
        (host, String::from_utf8(origin).unwrap())
    }

    #[test]
    fn test_1() {
        let (host, out) = relay("Referer: http://a/\r\nCookie: x=1\r\n\r\n");
        assert!(!host);
        assert_eq!(out, "Referer: http://a/\r\nCookie: x=1\r\n");
    }

    #[test]
    fn test_2() {
        // All five proxy-owned fields vanish, whatever their case.
        let (host, out) = relay(
            "user-agent: curl/8\r\nACCEPT: */*\r\naccept-encoding: br\r\n\
             Connection: keep-alive\r\nPROXY-CONNECTION: keep-alive\r\n\r\n",
        );
        assert!(!host);
        assert_eq!(out, "");
    }

    #[test]
    fn test_3() {
        // Host is noticed and still forwarded.
        let (host, out) = relay("Host: example.com\r\nRange: bytes=0-1\r\n\r\n");
        assert!(host);
        assert_eq!(out, "Host: example.com\r\nRange: bytes=0-1\r\n");
    }

    #[test]
    fn test_4() {
        // Trailing spaces before the colon do not hide a field.
        let (_, out) = relay("User-Agent  : curl/8\r\nX-Ok: 1\r\n\r\n");
        assert_eq!(out, "X-Ok: 1\r\n");
    }

    #[test]
    fn test_5() {
        // Hang-up before the blank line is an error.
        let mut client = Cursor::new(b"X-Partial: yes\r\n".to_vec());
        let mut origin = Vec::new();
        let err = relay_client_headers(&mut client, &mut origin).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_6() {
        let mut origin = Vec::new();
        write_proxy_headers(&mut origin, false, "example.com").unwrap();
        let text = String::from_utf8(origin).unwrap();

        let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], "Host: example.com");
        assert!(lines[1].starts_with("User-Agent: Mozilla/5.0"));
        assert!(lines[2].starts_with("Accept: text/html"));
        assert_eq!(lines[3], "Accept-Encoding: gzip, deflate");
        assert_eq!(lines[4], "Connection: close");
        assert_eq!(lines[5], "Proxy-Connection: close");
    }

    #[test]
    fn test_7() {
        // With a client-supplied Host the proxy adds none of its own.
        let mut origin = Vec::new();
        write_proxy_headers(&mut origin, true, "example.com").unwrap();
        assert!(!String::from_utf8(origin).unwrap().contains("Host:"));
    }

    #[test]
    fn test_8() {
        let mut client = Cursor::new(b"A: 1\r\nB: 2\r\n\r\nBODY".to_vec());
        drain_client_headers(&mut client).unwrap();
        let mut rest = Vec::new();
        std::io::Read::read_to_end(&mut client, &mut rest).unwrap();
        assert_eq!(rest, b"BODY");
    }
}
