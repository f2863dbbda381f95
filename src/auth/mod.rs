//! Admin token authentication.
//!
//! The only protected surface is the admin cache-clear endpoint, which
//! requires a bearer token. Token comparison is constant time so attackers
//! cannot probe the token byte by byte.

use axum::http::HeaderMap;

/// Compare two strings in constant time (for equal lengths).
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut out = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        out |= x ^ y;
    }
    out == 0
}

/// Extract a bearer token from the Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Check an admin request against the configured token.
///
/// With no token configured the endpoint is effectively disabled: every
/// request is rejected rather than silently allowed.
pub fn check_admin_token(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return false;
    };
    match extract_bearer(headers) {
        Some(provided) => timing_safe_eq(provided, expected),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn timing_safe_eq_basic() {
        assert!(timing_safe_eq("secret", "secret"));
        assert!(!timing_safe_eq("secret", "secres"));
        assert!(!timing_safe_eq("secret", "secret2"));
        assert!(timing_safe_eq("", ""));
    }

    #[test]
    fn extracts_bearer_token() {
        let headers = headers_with_auth("Bearer abc123");
        assert_eq!(extract_bearer(&headers), Some("abc123"));

        let headers = headers_with_auth("Bearer   padded  ");
        assert_eq!(extract_bearer(&headers), Some("padded"));

        let headers = headers_with_auth("Basic dXNlcg==");
        assert_eq!(extract_bearer(&headers), None);

        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn admin_check_requires_configured_token() {
        let headers = headers_with_auth("Bearer tok");
        assert!(check_admin_token(&headers, Some("tok")));
        assert!(!check_admin_token(&headers, Some("other")));
        // Unset or empty configured token always rejects.
        assert!(!check_admin_token(&headers, None));
        assert!(!check_admin_token(&headers, Some("")));
        assert!(!check_admin_token(&HeaderMap::new(), Some("tok")));
    }
}
