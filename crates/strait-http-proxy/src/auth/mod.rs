//! Proxy-level Basic Authentication.
//!
//! - `basic` - token decoding and constant-time credential comparison
//! - `cache` - TTL cache over validation results with a background sweeper

mod basic;
mod cache;

pub use basic::{compare_credentials, parse_basic_auth, Credentials};
pub use cache::{AuthCache, SweeperHandle};
