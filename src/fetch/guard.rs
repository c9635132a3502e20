//! SSRF guard
//!
//! Keeps the fetcher from being pointed at the operator's own network: only
//! `http`/`https` are allowed, and a host whose every resolved address is
//! private, loopback, link-local or otherwise non-routable is refused.

use crate::fetch::FetchError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Returns true if `ip` is not a publicly routable destination
pub fn is_private_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        // 192.0.0.0/24 protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xFE) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_v4(mapped);
    }

    let segments = ip.segments();
    // 64:ff9b::/96 NAT64 carries an IPv4 address in its low 32 bits
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let [.., a, b, c, d] = ip.octets();
        return is_private_v4(Ipv4Addr::new(a, b, c, d));
    }

    let first = segments[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Checks that `url` may be fetched
///
/// # Arguments
///
/// * `url` - The URL about to be requested (initial URL or redirect target)
/// * `block_private` - Whether the address check runs at all; the scheme
///   check always does
///
/// # Returns
///
/// * `Ok(())` - The destination is allowed
/// * `Err(FetchError::Blocked)` - Disallowed scheme or private destination
/// * `Err(FetchError::Unreachable)` - The host did not resolve
pub async fn check_destination(url: &Url, block_private: bool) -> Result<(), FetchError> {
    let blocked = |reason: String| FetchError::Blocked {
        url: url.to_string(),
        reason,
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(blocked(format!("scheme '{}' is not allowed", other))),
    }

    if !block_private {
        return Ok(());
    }

    let host = url
        .host()
        .ok_or_else(|| blocked("URL has no host".to_string()))?;

    let addresses: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(80);
            let resolved = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| FetchError::Unreachable {
                    url: url.to_string(),
                    message: format!("DNS resolution failed: {}", e),
                })?;
            resolved.map(|addr| addr.ip()).collect()
        }
    };

    if addresses.is_empty() {
        return Err(FetchError::Unreachable {
            url: url.to_string(),
            message: "host resolved to no addresses".to_string(),
        });
    }

    if addresses.iter().all(|ip| is_private_address(*ip)) {
        return Err(blocked(format!(
            "{} resolves only to private addresses",
            url.host_str().unwrap_or_default()
        )));
    }

    Ok(())
}
