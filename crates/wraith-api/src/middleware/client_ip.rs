//! Client IP derivation shared by the rate limiter and the logging
//! middleware (§4.5 RateLimit: "Client IP derivation").

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Derive the client IP: `X-Forwarded-For`'s leftmost address when
/// `trust_proxy` is set, else `X-Real-IP`, else the TCP peer address.
/// Always parsed and canonicalized (IPv4-mapped IPv6 folded to IPv4).
pub fn derive(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    let raw = if trust_proxy {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
            })
    } else {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
    };

    let parsed = raw.and_then(|s| s.parse::<IpAddr>().ok());
    let parsed = parsed.or_else(|| peer.map(|addr| addr.ip()));
    parsed.map(canonicalize)
}

pub fn from_connect_info(connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| *addr)
}

/// Fold an IPv4-mapped IPv6 address down to plain IPv4.
fn canonicalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        IpAddr::V4(v4) => IpAddr::V4(v4),
    }
}

/// Mask to /24 for IPv4 or /48 for IPv6, for privacy-preserving log lines
/// (§4.5 Logging).
pub fn mask_for_log(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            format!(
                "{:x}:{:x}:{:x}::/48",
                segments[0], segments[1], segments[2]
            )
        }
    }
}

/// A stable per-client key for the rate limiter, independent of the
/// human-readable masked form used for logging.
pub fn rate_limit_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => v6.to_string(),
    }
}

pub const UNKNOWN_CLIENT: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn trust_proxy_uses_leftmost_forwarded_for() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4, 5.6.7.8")]);
        let ip = derive(&h, None, true).unwrap();
        assert_eq!(ip.to_string(), "1.2.3.4");
    }

    #[test]
    fn without_trust_proxy_uses_real_ip() {
        let h = headers(&[
            ("x-forwarded-for", "1.2.3.4"),
            ("x-real-ip", "9.9.9.9"),
        ]);
        let ip = derive(&h, None, false).unwrap();
        assert_eq!(ip.to_string(), "9.9.9.9");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let h = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:4321".parse().unwrap();
        let ip = derive(&h, Some(peer), false).unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
    }

    #[test]
    fn masks_ipv4_to_slash_24() {
        let ip: IpAddr = "203.0.113.42".parse().unwrap();
        assert_eq!(mask_for_log(ip), "203.0.113.0/24");
    }
}
