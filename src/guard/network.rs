// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SSRF guard for outbound HTTP.
//!
//! ```text
//! raw URL ──► parse ──► scheme http(s)? ──► literal host blocked? ──► DNS answers blocked?
//! ```
//!
//! The literal check is pure and also runs on every redirect hop. The DNS check
//! runs once before the first request for a clear error, and again inside the
//! HTTP client through [`PublicResolver`], which covers redirect targets and
//! answers that change between the check and the connect.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Url;

use crate::error::GuardError;

/// Hostnames that always point back at the sandbox host.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "0.0.0.0", "::1"];

/// Parse a URL and reject non-http(s) schemes and local/private literal hosts.
pub fn validate_public_url(raw: &str) -> Result<Url, GuardError> {
    let url = Url::parse(raw.trim()).map_err(|e| GuardError::InvalidUrl(format!("{raw}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(GuardError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| GuardError::InvalidUrl(format!("{raw}: missing host")))?;
    if is_blocked_host(host) {
        return Err(GuardError::BlockedHost(host.to_string()));
    }

    Ok(url)
}

/// Check a host string (domain or IP literal, IPv6 optionally bracketed).
pub fn is_blocked_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    if BLOCKED_HOSTNAMES.contains(&host.as_str()) || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(is_blocked_ip).unwrap_or(false)
}

/// Loopback, private, link-local, unique-local and unspecified addresses.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique-local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}

/// Resolve the URL's host and fail if any answer is a blocked address.
pub async fn ensure_resolves_public(url: &Url) -> Result<(), GuardError> {
    let host = url
        .host_str()
        .ok_or_else(|| GuardError::InvalidUrl(url.to_string()))?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        // Literal addresses were already classified by validate_public_url.
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs = tokio::net::lookup_host((bare, port))
        .await
        .map_err(|_| GuardError::Unresolvable(bare.to_string()))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_blocked_ip(addr.ip()) {
            return Err(GuardError::BlockedHost(format!("{bare} ({})", addr.ip())));
        }
    }
    if !resolved_any {
        return Err(GuardError::Unresolvable(bare.to_string()));
    }
    Ok(())
}

/// Keep only the addresses outbound HTTP may connect to.
pub fn public_addrs(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    addrs
        .into_iter()
        .filter(|addr| !is_blocked_ip(addr.ip()))
        .collect()
}

/// DNS resolver for the tool HTTP client that never hands back a blocked
/// address. A name with only blocked answers fails to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(lookup_public(name.as_str().to_string()))
    }
}

async fn lookup_public(host: String) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();
    let allowed = public_addrs(resolved);
    if allowed.is_empty() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::PermissionDenied,
            GuardError::BlockedHost(host),
        )));
    }
    Ok(Box::new(allowed.into_iter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_urls() {
        assert!(validate_public_url("https://example.com/docs").is_ok());
        assert!(validate_public_url("http://93.184.216.34/").is_ok());
        assert!(validate_public_url("https://[2606:4700::1111]/").is_ok());
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        for url in ["file:///etc/passwd", "ftp://example.com", "gopher://x"] {
            assert!(matches!(
                validate_public_url(url),
                Err(GuardError::UnsupportedScheme(_))
            ));
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            validate_public_url("not a url"),
            Err(GuardError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_local_hosts() {
        for url in [
            "http://localhost:8080/",
            "http://LOCALHOST/",
            "http://api.localhost/",
            "http://0.0.0.0/",
            "http://127.0.0.1/",
            "http://127.10.0.1/",
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fc12::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(
                matches!(validate_public_url(url), Err(GuardError::BlockedHost(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_private_range_edges() {
        assert!(!is_blocked_ip("172.15.255.255".parse().unwrap()));
        assert!(!is_blocked_ip("172.32.0.0".parse().unwrap()));
        assert!(!is_blocked_ip("192.169.0.1".parse().unwrap()));
        assert!(!is_blocked_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_blocked_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_resolution_skipped_for_literals() {
        let url = validate_public_url("http://93.184.216.34/").unwrap();
        assert!(ensure_resolves_public(&url).await.is_ok());
    }

    #[test]
    fn test_public_addrs_drops_blocked_answers() {
        let answers: Vec<SocketAddr> = [
            "127.0.0.1:0",
            "10.0.0.1:0",
            "93.184.216.34:0",
            "[::1]:0",
            "[2606:4700::1111]:0",
        ]
        .iter()
        .map(|a| a.parse().unwrap())
        .collect();

        let kept = public_addrs(answers);
        assert_eq!(
            kept,
            vec![
                "93.184.216.34:0".parse::<SocketAddr>().unwrap(),
                "[2606:4700::1111]:0".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_public_addrs_all_private() {
        let answers = ["127.0.0.1:80".parse::<SocketAddr>().unwrap()];
        assert!(public_addrs(answers).is_empty());
    }

    #[tokio::test]
    async fn test_resolver_refuses_loopback_names() {
        let name: Name = "localhost".parse().unwrap();
        assert!(PublicResolver.resolve(name).await.is_err());
    }
}
