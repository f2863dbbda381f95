//! Bind mode resolution
//!
//! Parses `gateway.bind` config values and resolves to socket addresses:
//! - `loopback` -> 127.0.0.1 (default, safest — local access only)
//! - `all` -> 0.0.0.0 (all interfaces)
//! - Any explicit IP address or `host:port` -> use as-is

use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use thiserror::Error;

/// Default gateway port
pub const DEFAULT_PORT: u16 = 18700;

/// Read `gateway.port` from a loaded config value.
///
/// Values that do not fit in a u16 fall back to [`DEFAULT_PORT`] rather than
/// truncating; `validate_config` flags them as warnings.
pub fn port_from_config(config: &Value) -> u16 {
    config
        .get("gateway")
        .and_then(|g| g.get("port"))
        .and_then(|v| v.as_u64())
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Bind mode specifying how to resolve the listen address
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1)
    #[default]
    Loopback,
    /// Bind to all interfaces (0.0.0.0)
    All,
    /// Custom IP address or hostname
    Custom(String),
}

/// Errors that can occur during bind address resolution
#[derive(Error, Debug)]
pub enum BindError {
    #[error("Invalid IP address or hostname: {0}")]
    InvalidAddress(String),

    #[error("Failed to resolve hostname {host}: {message}")]
    ResolutionFailed { host: String, message: String },
}

/// Parse a bind mode string from config
pub fn parse_bind_mode(value: &str) -> BindMode {
    match value.trim().to_lowercase().as_str() {
        "loopback" | "localhost" | "local" => BindMode::Loopback,
        "all" | "auto" | "0.0.0.0" => BindMode::All,
        other => BindMode::Custom(other.to_string()),
    }
}

/// Resolve a bind mode to a socket address.
///
/// For most modes, the `port` parameter is used directly. For `Custom` mode
/// with a `host:port` string, the embedded port overrides the `port` parameter.
pub fn resolve_bind_address(mode: &BindMode, port: u16) -> Result<SocketAddr, BindError> {
    match mode {
        BindMode::Loopback => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)),
        BindMode::All => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
        BindMode::Custom(addr) => resolve_custom_address(addr, port),
    }
}

/// Resolve a custom IP address, hostname, or `host:port` string.
///
/// If the string contains a colon-separated port (e.g. `"192.168.1.5:9000"`
/// or `"myhost:9000"`), the embedded port is used instead of `default_port`.
/// A bare IP or hostname uses `default_port`.
fn resolve_custom_address(addr: &str, default_port: u16) -> Result<SocketAddr, BindError> {
    // Try parsing as a full socket address (e.g. "192.168.1.5:9000")
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock);
    }

    // Try parsing as a bare IP address (no port)
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    // Check for host:port format (split on last colon to handle IPv6 correctly)
    if let Some((host, port_str)) = split_host_port(addr) {
        if let Ok(port) = port_str.parse::<u16>() {
            let ip = resolve_hostname(host)?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    // Treat the whole string as a hostname
    let ip = resolve_hostname(addr)?;
    Ok(SocketAddr::new(ip, default_port))
}

/// Split a `host:port` string. Returns `None` if there is no port component.
/// For IPv6 addresses in brackets (e.g. `[::1]:8080`), handles the bracket syntax.
fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    // Handle bracketed IPv6: [::1]:port
    if addr.starts_with('[') {
        if let Some(bracket_end) = addr.find(']') {
            if addr.as_bytes().get(bracket_end + 1) == Some(&b':') {
                let host = &addr[1..bracket_end];
                let port = &addr[bracket_end + 2..];
                if !port.is_empty() {
                    return Some((host, port));
                }
            }
        }
        return None;
    }

    // For non-bracketed strings, only split if there's exactly one colon
    // (multiple colons would indicate an IPv6 address without brackets)
    let colon_count = addr.chars().filter(|&c| c == ':').count();
    if colon_count == 1 {
        let idx = addr.rfind(':')?;
        let host = &addr[..idx];
        let port = &addr[idx + 1..];
        if !host.is_empty() && !port.is_empty() {
            return Some((host, port));
        }
    }

    None
}

/// Resolve a hostname to an IP address, preferring IPv4.
fn resolve_hostname(host: &str) -> Result<IpAddr, BindError> {
    let socket_addr = format!("{}:0", host);
    match socket_addr.to_socket_addrs() {
        Ok(addrs) => {
            let mut ipv6 = None;
            for addr in addrs {
                match addr.ip() {
                    IpAddr::V4(_) => return Ok(addr.ip()),
                    IpAddr::V6(_) => {
                        if ipv6.is_none() {
                            ipv6 = Some(addr.ip());
                        }
                    }
                }
            }

            ipv6.ok_or_else(|| BindError::ResolutionFailed {
                host: host.to_string(),
                message: "No addresses found".to_string(),
            })
        }
        Err(e) => Err(BindError::ResolutionFailed {
            host: host.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Result of bind address resolution with additional metadata
#[derive(Debug)]
pub struct ResolvedBind {
    /// The resolved socket address
    pub address: SocketAddr,
    /// The bind mode that was used
    pub mode: BindMode,
    /// Human-readable description
    pub description: String,
    /// Whether this address is accessible from other machines
    pub externally_accessible: bool,
}

/// Resolve bind address with full metadata
pub fn resolve_bind_with_metadata(mode: &BindMode, port: u16) -> Result<ResolvedBind, BindError> {
    let address = resolve_bind_address(mode, port)?;

    let (description, externally_accessible) = match mode {
        BindMode::Loopback => (format!("localhost only ({})", address), false),
        BindMode::All => (format!("all interfaces ({})", address), true),
        BindMode::Custom(addr) => (
            format!("custom ({} -> {})", addr, address),
            !address.ip().is_loopback(),
        ),
    };

    Ok(ResolvedBind {
        address,
        mode: mode.clone(),
        description,
        externally_accessible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_mode_loopback() {
        assert_eq!(parse_bind_mode("loopback"), BindMode::Loopback);
        assert_eq!(parse_bind_mode("localhost"), BindMode::Loopback);
        assert_eq!(parse_bind_mode("local"), BindMode::Loopback);
        assert_eq!(parse_bind_mode("LOOPBACK"), BindMode::Loopback);
        assert_eq!(parse_bind_mode("  loopback  "), BindMode::Loopback);
    }

    #[test]
    fn test_parse_bind_mode_all() {
        assert_eq!(parse_bind_mode("all"), BindMode::All);
        assert_eq!(parse_bind_mode("auto"), BindMode::All);
        assert_eq!(parse_bind_mode("0.0.0.0"), BindMode::All);
    }

    #[test]
    fn test_parse_bind_mode_custom() {
        assert_eq!(
            parse_bind_mode("192.168.1.100"),
            BindMode::Custom("192.168.1.100".to_string())
        );
        assert_eq!(
            parse_bind_mode("myhost.local"),
            BindMode::Custom("myhost.local".to_string())
        );
    }

    #[test]
    fn test_resolve_loopback() {
        let addr = resolve_bind_address(&BindMode::Loopback, 8080).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_resolve_all() {
        let addr = resolve_bind_address(&BindMode::All, 9000).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn test_resolve_custom_ip() {
        let addr = resolve_bind_address(&BindMode::Custom("10.0.0.1".to_string()), 3000).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_resolve_custom_ipv6() {
        let addr = resolve_bind_address(&BindMode::Custom("::1".to_string()), 3000).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_resolve_custom_host_port() {
        // An explicit host:port should use the embedded port, not the default
        let addr =
            resolve_bind_address(&BindMode::Custom("127.0.0.1:9000".to_string()), 3000).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn test_resolve_custom_bare_ip_uses_default_port() {
        let addr = resolve_bind_address(&BindMode::Custom("10.0.0.5".to_string()), 4000).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(addr.port(), 4000);
    }

    #[test]
    fn test_split_host_port_basic() {
        assert_eq!(split_host_port("host:1234"), Some(("host", "1234")));
        assert_eq!(
            split_host_port("192.168.1.1:8080"),
            Some(("192.168.1.1", "8080"))
        );
    }

    #[test]
    fn test_split_host_port_no_port() {
        assert_eq!(split_host_port("192.168.1.1"), None);
        assert_eq!(split_host_port("hostname"), None);
    }

    #[test]
    fn test_split_host_port_ipv6_no_brackets() {
        // Multiple colons without brackets -> treated as IPv6, no split
        assert_eq!(split_host_port("::1"), None);
        assert_eq!(split_host_port("fe80::1"), None);
    }

    #[test]
    fn test_split_host_port_ipv6_bracketed() {
        assert_eq!(split_host_port("[::1]:8080"), Some(("::1", "8080")));
        assert_eq!(split_host_port("[fe80::1]:443"), Some(("fe80::1", "443")));
    }

    #[test]
    fn test_split_host_port_edge_cases() {
        // Empty port
        assert_eq!(split_host_port("host:"), None);
        // Empty host
        assert_eq!(split_host_port(":1234"), None);
        // Bracket without port
        assert_eq!(split_host_port("[::1]"), None);
    }

    #[test]
    fn test_bind_mode_default() {
        assert_eq!(BindMode::default(), BindMode::Loopback);
    }

    #[test]
    fn test_resolve_with_metadata_loopback() {
        let result = resolve_bind_with_metadata(&BindMode::Loopback, DEFAULT_PORT).unwrap();
        assert_eq!(result.address.port(), DEFAULT_PORT);
        assert!(!result.externally_accessible);
        assert!(result.description.contains("localhost"));
    }

    #[test]
    fn test_resolve_with_metadata_all() {
        let result = resolve_bind_with_metadata(&BindMode::All, 8080).unwrap();
        assert!(result.externally_accessible);
        assert!(result.description.contains("all interfaces"));
    }

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_PORT, 18700);
    }

    #[test]
    fn test_port_from_config() {
        let cfg = serde_json::json!({"gateway": {"port": 9000}});
        assert_eq!(port_from_config(&cfg), 9000);
    }

    #[test]
    fn test_port_from_config_missing_uses_default() {
        assert_eq!(port_from_config(&serde_json::json!({})), DEFAULT_PORT);
        let no_port = serde_json::json!({"gateway": {"bind": "all"}});
        assert_eq!(port_from_config(&no_port), DEFAULT_PORT);
        let not_a_number = serde_json::json!({"gateway": {"port": "9000"}});
        assert_eq!(port_from_config(&not_a_number), DEFAULT_PORT);
    }

    #[test]
    fn test_port_from_config_out_of_range_uses_default() {
        // 70000 does not fit in a u16 and must not wrap around to 4464.
        let cfg = serde_json::json!({"gateway": {"port": 70000}});
        assert_eq!(port_from_config(&cfg), DEFAULT_PORT);
    }
}
