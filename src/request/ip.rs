//! Client IP resolution.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! `X-Real-IP` is trusted as-is. Only rely on it when the service sits behind
//! a reverse proxy that overwrites the header:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! ```

use axum::http::HeaderMap;

/// Header consulted before the connection's remote address.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Where a client IP came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromRealIp(&'a str),
    FromRemoteAddr(&'a str),
    NotFound,
}

#[inline]
fn extract_ip<'a>(headers: &'a HeaderMap, remote_addr: &'a str) -> ExtractedIp<'a> {
    if let Some(real_ip) = headers.get(REAL_IP_HEADER)
        && let Ok(value) = real_ip.to_str()
        && !value.is_empty()
    {
        return ExtractedIp::FromRealIp(value);
    }

    match split_host(remote_addr) {
        Some(host) => ExtractedIp::FromRemoteAddr(host),
        None => ExtractedIp::NotFound,
    }
}

/// Resolve the client IP: `X-Real-IP` when non-empty, else the host part of
/// `remote_addr` with the port stripped, else an empty string.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str) -> String {
    match extract_ip(headers, remote_addr) {
        ExtractedIp::FromRealIp(ip) | ExtractedIp::FromRemoteAddr(ip) => ip.to_string(),
        ExtractedIp::NotFound => String::new(),
    }
}

/// Host part of a `host:port` address. IPv6 brackets are removed.
/// Addresses without a port are rejected.
fn split_host(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return (!port.contains(':')).then_some(host);
    }

    let (host, _port) = addr.rsplit_once(':')?;
    // A bare IPv6 address without brackets is ambiguous
    (!host.contains(':')).then_some(host)
}
