//! Basic auth for `/api/*`.

use base64::Engine as _;

/// Check an `Authorization` header value against the configured pair.
///
/// Comparison is length-independent constant-time over the decoded
/// credential string.
#[must_use]
pub fn authorized(header: Option<&str>, user: &str, pass: &str) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };

    let expected = format!("{user}:{pass}");
    constant_time_eq(decoded.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = u8::from(a.len() != b.len());
    let len = a.len().min(b.len());
    for i in 0..len {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
        )
    }

    #[test]
    fn accepts_correct_credentials() {
        assert!(authorized(Some(&basic("ops", "pw")), "ops", "pw"));
    }

    #[test]
    fn rejects_wrong_password() {
        assert!(!authorized(Some(&basic("ops", "nope")), "ops", "pw"));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!authorized(None, "ops", "pw"));
    }

    #[test]
    fn rejects_non_basic_scheme() {
        assert!(!authorized(Some("Bearer token"), "ops", "pw"));
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(!authorized(Some("Basic !!!"), "ops", "pw"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
