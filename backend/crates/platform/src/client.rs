//! Client identification utilities
//!
//! Resolves the identity a rate limit bucket is scoped to.

use axum::http::HeaderMap;
use std::fmt;
use std::net::IpAddr;

/// Header carrying an application-level user identifier
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity used when nothing identifies the caller
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// What an [`Identity`] value is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    User,
    Ip,
}

impl IdentityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Ip => "ip",
        }
    }
}

/// Rate limit identity
///
/// The kind is part of the storage key, so a user id that happens to look
/// like an IP address never shares a counter with that IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub kind: IdentityKind,
    pub value: String,
}

impl Identity {
    pub fn user(value: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::User,
            value: value.into(),
        }
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Ip,
            value: value.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::ip(UNKNOWN_IDENTITY)
    }

    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Resolve the rate limit identity for a request
///
/// Precedence:
/// 1. `x-user-id` header
/// 2. first address in `x-forwarded-for`
/// 3. `x-real-ip`
/// 4. direct connection IP
/// 5. `"unknown"`
pub fn resolve_identity(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Identity {
    if let Some(user_id) = header_str(headers, USER_ID_HEADER) {
        return Identity::user(user_id);
    }

    match extract_client_ip(headers, direct_ip) {
        Some(ip) => Identity::ip(ip.to_string()),
        None => Identity::unknown(),
    }
}

/// Extract client IP address from headers
///
/// Checks `X-Forwarded-For` first (reverse proxy setups), then
/// `X-Real-IP`, then falls back to the direct connection IP.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Option<IpAddr> {
    // First IP in the list is the original client
    if let Some(xff) = header_str(headers, "x-forwarded-for") {
        if let Some(first_ip) = xff.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        if let Ok(ip) = real_ip.parse::<IpAddr>() {
            return Some(ip);
        }
    }

    direct_ip
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user-42"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1"));

        let identity = resolve_identity(&headers, None);
        assert_eq!(identity, Identity::user("user-42"));
        assert_eq!(identity.storage_key(), "user:user-42");
    }

    #[test]
    fn test_extract_client_ip_xff() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.9"));

        let ip = extract_client_ip(&headers, None);
        assert_eq!(ip, Some("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_extract_client_ip_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.9"));

        let identity = resolve_identity(&headers, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(identity, Identity::ip("172.16.0.9"));
    }

    #[test]
    fn test_extract_client_ip_direct() {
        let headers = HeaderMap::new();
        let direct: IpAddr = "127.0.0.1".parse().unwrap();

        let ip = extract_client_ip(&headers, Some(direct));
        assert_eq!(ip, Some(direct));
    }

    #[test]
    fn test_unknown_identity() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("   "));

        let identity = resolve_identity(&headers, None);
        assert_eq!(identity.storage_key(), "ip:unknown");
    }

    #[test]
    fn test_user_and_ip_keys_differ() {
        assert_ne!(
            Identity::user("1.2.3.4").storage_key(),
            Identity::ip("1.2.3.4").storage_key()
        );
    }
}
