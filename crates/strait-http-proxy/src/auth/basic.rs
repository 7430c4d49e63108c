//! Basic-scheme token decoding and credential comparison.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use subtle::ConstantTimeEq;

/// A parsed username/password pair from a `Proxy-Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

const MAX_USERNAME_LEN: usize = 64;
const MAX_PASSWORD_LEN: usize = 128;

/// Decode a `Basic <base64>` token into credentials.
///
/// The scheme prefix is compared case-insensitively over exactly the prefix
/// length. Returns `None` on a missing prefix, undecodable base64, a missing
/// `:` separator, or credentials that fail [`is_valid_credentials`].
pub fn parse_basic_auth(token: &str) -> Option<Credentials> {
    const PREFIX: &str = "Basic ";

    if token.len() < PREFIX.len() || !token[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        return None;
    }

    let decoded = STANDARD.decode(&token[PREFIX.len()..]).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    if !is_valid_credentials(username, password) {
        return None;
    }

    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Charset and length limits on decoded credentials. Control bytes that
/// could smuggle header lines (NUL, CR, LF) are rejected outright.
fn is_valid_credentials(username: &str, password: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && password.len() <= MAX_PASSWORD_LEN
        && !username.bytes().any(|b| matches!(b, 0 | b'\r' | b'\n'))
        && !password.bytes().any(|b| matches!(b, 0 | b'\r' | b'\n'))
}

/// Constant-time comparison of a credential pair against the expected
/// identity. Both components are always compared; the result is the AND of
/// the two equalities. Mismatched lengths compare unequal without revealing
/// anything beyond the length itself.
pub fn compare_credentials(
    input_user: &str,
    input_pass: &str,
    expected_user: &str,
    expected_pass: &str,
) -> bool {
    let user_match = input_user.as_bytes().ct_eq(expected_user.as_bytes());
    let pass_match = input_pass.as_bytes().ct_eq(expected_pass.as_bytes());
    bool::from(user_match & pass_match)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn test_parse_valid_token() {
        let creds = parse_basic_auth(&token("alice", "s3cret")).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        let encoded = STANDARD.encode("bob:pw");
        assert!(parse_basic_auth(&format!("basic {encoded}")).is_some());
        assert!(parse_basic_auth(&format!("BASIC {encoded}")).is_some());
    }

    #[test]
    fn test_password_may_contain_colon() {
        let creds = parse_basic_auth(&token("u", "a:b:c")).unwrap();
        assert_eq!(creds.password, "a:b:c");
    }

    #[test]
    fn test_rejects_missing_prefix() {
        assert!(parse_basic_auth("Bearer abc").is_none());
        assert!(parse_basic_auth("").is_none());
        assert!(parse_basic_auth("Basic").is_none());
    }

    #[test]
    fn test_rejects_bad_base64() {
        assert!(parse_basic_auth("Basic not*base64!").is_none());
    }

    #[test]
    fn test_rejects_missing_separator() {
        let encoded = STANDARD.encode("no-colon-here");
        assert!(parse_basic_auth(&format!("Basic {encoded}")).is_none());
    }

    #[test]
    fn test_rejects_empty_username() {
        assert!(parse_basic_auth(&token("", "pw")).is_none());
    }

    #[test]
    fn test_rejects_oversized_username() {
        let long = "u".repeat(65);
        assert!(parse_basic_auth(&token(&long, "pw")).is_none());
        let max = "u".repeat(64);
        assert!(parse_basic_auth(&token(&max, "pw")).is_some());
    }

    #[test]
    fn test_rejects_oversized_password() {
        let long = "p".repeat(129);
        assert!(parse_basic_auth(&token("u", &long)).is_none());
        let max = "p".repeat(128);
        assert!(parse_basic_auth(&token("u", &max)).is_some());
    }

    #[test]
    fn test_rejects_control_bytes() {
        assert!(parse_basic_auth(&token("u\0ser", "pw")).is_none());
        assert!(parse_basic_auth(&token("user", "p\rw")).is_none());
        assert!(parse_basic_auth(&token("user", "p\nw")).is_none());
    }

    #[test]
    fn test_compare_exact_match() {
        assert!(compare_credentials("alice", "pw", "alice", "pw"));
    }

    #[test]
    fn test_compare_rejects_either_mismatch() {
        // A correct username with a wrong password must still be rejected.
        assert!(!compare_credentials("alice", "wrong", "alice", "pw"));
        assert!(!compare_credentials("mallory", "pw", "alice", "pw"));
        assert!(!compare_credentials("mallory", "wrong", "alice", "pw"));
    }

    #[test]
    fn test_compare_rejects_length_mismatch() {
        assert!(!compare_credentials("alice", "pw", "alice", "pwpw"));
        assert!(!compare_credentials("al", "pw", "alice", "pw"));
    }
}
