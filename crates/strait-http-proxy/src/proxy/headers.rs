//! Hop-by-hop header removal.
//!
//! Headers listed here are meaningful only for a single transport leg and
//! must be stripped before a request or response is forwarded.
//! http://www.w3.org/Protocols/rfc2616/rfc2616-sec13.html

use hyper::header::{HeaderMap, HeaderName, CONNECTION};

// Fixed hop-by-hop set. "Proxy-Connection" is non-standard but still sent by
// libcurl; "Trailer" per RFC errata 4522 (not "Trailers").
pub static HOP_HEADERS: [HeaderName; 9] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

/// Remove hop-by-hop headers from `headers`.
///
/// First deletes every header named in the `Connection` header value
/// (comma-separated, trimmed), then the fixed hop-by-hop set. Idempotent.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let connection_tokens: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                None
            } else {
                HeaderName::try_from(token.to_ascii_lowercase()).ok()
            }
        })
        .collect();

    for name in connection_tokens {
        headers.remove(&name);
    }

    for name in &HOP_HEADERS {
        headers.remove(name);
    }
}
