//! Informational network helpers for the front-end.
//!
//! Nothing here touches relayed traffic: these only help pick an external
//! port and tell the user which addresses the relay is reachable on.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, ToSocketAddrs};
use tracing::debug;

/// Port the front-end starts searching from when none is given.
pub const DEFAULT_SEARCH_START: u16 = 5000;

/// Whether `0.0.0.0:<port>` can be bound right now.
///
/// The answer can be stale by the time the caller binds for real.
pub fn is_port_available(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).is_ok()
}

/// First available port at or above `start`.
pub fn find_available_port(start: u16) -> Option<u16> {
    (start.max(1)..=u16::MAX).find(|port| is_port_available(*port))
}

/// IPv4 addresses this host's name resolves to, suitable for telling remote
/// clients where to connect.
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let Some(name) = hostname() else {
        debug!("Could not determine host name");
        return Vec::new();
    };
    match (name.as_str(), 0).to_socket_addrs() {
        Ok(addrs) => select_addresses(addrs.map(|addr| addr.ip())),
        Err(e) => {
            debug!("Could not resolve host name {}: {}", name, e);
            Vec::new()
        }
    }
}

/// Keep IPv4, drop loopback, and only fall back to link-local (169.254/16,
/// self-assigned) when nothing better exists. Sorted and deduplicated.
pub fn select_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut preferred = Vec::new();
    let mut fallback = None;

    for addr in addrs {
        let IpAddr::V4(v4) = addr else {
            continue;
        };
        if v4.is_loopback() {
            continue;
        }
        if v4.is_link_local() {
            fallback = Some(v4);
            continue;
        }
        preferred.push(v4);
    }

    if preferred.is_empty() {
        preferred.extend(fallback);
    }
    preferred.sort();
    preferred.dedup();
    preferred
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if ret != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_select_skips_loopback_and_ipv6() {
        let addrs = vec![
            v4(127, 0, 0, 1),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            v4(192, 168, 1, 20),
        ];
        assert_eq!(select_addresses(addrs), vec![Ipv4Addr::new(192, 168, 1, 20)]);
    }

    #[test]
    fn test_select_prefers_routable_over_link_local() {
        let addrs = vec![v4(169, 254, 3, 4), v4(10, 0, 0, 7)];
        assert_eq!(select_addresses(addrs), vec![Ipv4Addr::new(10, 0, 0, 7)]);
    }

    #[test]
    fn test_select_falls_back_to_link_local() {
        let addrs = vec![v4(127, 0, 0, 1), v4(169, 254, 3, 4)];
        assert_eq!(select_addresses(addrs), vec![Ipv4Addr::new(169, 254, 3, 4)]);
    }

    #[test]
    fn test_select_sorts_and_dedups() {
        let addrs = vec![v4(192, 168, 1, 9), v4(10, 0, 0, 1), v4(192, 168, 1, 9)];
        assert_eq!(
            select_addresses(addrs),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(192, 168, 1, 9)]
        );
    }

    #[test]
    fn test_select_empty() {
        assert!(select_addresses(Vec::new()).is_empty());
    }

    #[test]
    fn test_occupied_port_is_unavailable() {
        let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        assert!(!is_port_available(port));
    }

    #[test]
    fn test_port_zero_is_unavailable() {
        assert!(!is_port_available(0));
    }

    #[test]
    fn test_find_available_port_skips_occupied() {
        let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let found = find_available_port(port).unwrap();
        assert!(found > port);
        assert!(is_port_available(found));
    }

    #[test]
    fn test_local_addresses_exclude_loopback() {
        assert!(local_ipv4_addresses().iter().all(|ip| !ip.is_loopback()));
    }
}
