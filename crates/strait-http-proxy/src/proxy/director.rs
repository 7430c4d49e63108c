//! Outbound request rewriting.
//!
//! The director turns an inbound request into the request actually sent
//! upstream: scheme and host come from the target, the target's base path is
//! joined with the inbound path with exactly one slash at the junction, and
//! the two query strings are merged.

use hyper::header::{HeaderMap, HeaderValue};
use hyper::http::request::Parts;
use hyper::http::uri::{Authority, Scheme};
use hyper::Uri;
use std::net::IpAddr;

/// Rewrite target: scheme, host, base path, and base query.
#[derive(Debug, Clone)]
pub struct Target {
    scheme: Scheme,
    authority: Authority,
    path: String,
    query: Option<String>,
}

impl Target {
    /// Parse a base URL such as `http://127.0.0.1:9000/base?a=10`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let uri: Uri = raw.parse()?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("target URL must include a host: '{raw}'"))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        Ok(Self {
            scheme,
            authority,
            path: uri.path().to_string(),
            query: uri.query().map(String::from),
        })
    }

    /// Forward-proxy mode: the request's own host is the target, with no
    /// base path or query. Taken from the absolute-form request URI, falling
    /// back to the `Host` header.
    pub fn from_request(parts: &Parts) -> Option<Self> {
        let authority = parts.uri.authority().cloned().or_else(|| {
            parts
                .headers
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<Authority>().ok())
        })?;
        let scheme = parts.uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        Some(Self {
            scheme,
            authority,
            path: String::new(),
            query: None,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Build the outbound URI for an inbound request URI.
    pub fn rewrite_uri(&self, inbound: &Uri) -> anyhow::Result<Uri> {
        let path = single_joining_slash(&self.path, inbound.path());
        let query = match (self.query.as_deref(), inbound.query()) {
            (None, None) => None,
            (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
            (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        };
        let path_and_query = match query {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };
        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?)
    }
}

/// Join two path segments with exactly one `/` at the junction.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Append the client IP to `X-Forwarded-For`, folding any prior values into
/// one comma+space separated list.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    const X_FORWARDED_FOR: &str = "x-forwarded-for";

    let prior: Vec<String> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(String::from)
        .collect();

    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.remove(X_FORWARDED_FOR);
        headers.insert(
            hyper::header::HeaderName::from_static(X_FORWARDED_FOR),
            value,
        );
    }
}
