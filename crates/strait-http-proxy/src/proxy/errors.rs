//! Classification of benign connection-teardown errors.
//!
//! A proxy sees peers hang up mid-copy constantly; those conditions must not
//! be reported as failures. Structured categories (`io::ErrorKind`, raw OS
//! codes) are checked first, then a phrase allow-list covers conditions the
//! platform only exposes as strings. The string fallback is a pragmatic
//! approximation, not a complete classification.

use std::io;

/// Error strings that indicate the peer (or our own side) closed the
/// connection. Matched as substrings against the error's display output.
const CLOSED_CONN_PHRASES: &[&str] = &[
    "use of closed network connection",
    "connection reset by peer",
    "broken pipe",
    "i/o timeout",
    "connection refused",
    "connection timed out",
    "unexpected end of file",
    "unexpected eof",
    "eof",
    "tls: use of closed connection",
    "tls: protocol is shutdown",
    "http2: client conn not usable",
    "http2: server sent goaway",
    "goaway",
];

/// Returns true when `err` represents a benign connection-closed condition
/// rather than a genuine proxy failure.
pub fn is_closed_conn_error(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WriteZero => return true,
        _ => {}
    }

    if let Some(code) = err.raw_os_error() {
        if code == libc::ECONNRESET || code == libc::EPIPE {
            return true;
        }
    }

    is_closed_conn_message(&err.to_string())
}

/// String-match fallback for errors that arrive without structured kinds
/// (hyper errors, TLS shutdown notices, HTTP/2 GOAWAY).
pub fn is_closed_conn_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    CLOSED_CONN_PHRASES.iter().any(|p| msg.contains(p))
}

/// Classify a hyper error by its source chain and display output.
pub fn is_closed_conn_hyper(err: &hyper::Error) -> bool {
    if err.is_canceled() || err.is_incomplete_message() {
        return true;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return is_closed_conn_error(io_err);
        }
        source = e.source();
    }
    is_closed_conn_message(&err.to_string())
}
