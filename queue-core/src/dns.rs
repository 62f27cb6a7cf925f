//! SSRF-aware DNS resolution (C1, §4.1 rule 2).
//!
//! Adapted from `PublicIPv4Resolver`: resolve through the
//! stdlib resolver on a blocking thread, then filter results so that any
//! name resolving (even partially) into a blocked range is rejected rather
//! than connected to. Plugged into the [`reqwest::Client`] used by
//! [`crate::fetch::SafeFetcher`] via `ClientBuilder::dns_resolver`, so this
//! covers every connection reqwest makes, not just an explicit one-shot
//! `resolve_dns` call.

use std::error::Error as StdError;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use futures::FutureExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::task::spawn_blocking;

type BoxError = Box<dyn StdError + Send + Sync>;

/// True if `ip` falls in one of the ranges blocked by §4.1 rule 2.
pub fn is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local() // covers 169.254.0.0/16, including cloud metadata endpoints
        || ip.octets()[0] == 0 // "this network" / 0.0.0.0/8
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let octets = ip.octets();
    let is_unique_local = (octets[0] & 0xfe) == 0xfc; // fc00::/7
    let is_link_local = octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80; // fe80::/10

    is_unique_local || is_link_local
}

fn validate_addr(addr: &SocketAddr) -> bool {
    !is_blocked(addr.ip())
}

/// DNS resolver using the stdlib resolver, filtering out any address in a
/// blocked range (§4.1 rule 2). A name that resolves to a mix of public and
/// blocked addresses is rejected outright rather than silently dropping the
/// blocked ones: an attacker need only control one of several `A` records.
pub struct SafeResolver;

impl Resolve for SafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolve_host = move || (name.as_str(), 0).to_socket_addrs();

        let future_result = spawn_blocking(resolve_host).map(|result| match result {
            Ok(Ok(addrs)) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    let err: BoxError =
                        Box::new(io::Error::new(io::ErrorKind::NotFound, "no addresses"));
                    return Err(err);
                }
                if !addrs.iter().all(validate_addr) {
                    let err: BoxError = Box::new(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "resolved address is in a blocked range",
                    ));
                    return Err(err);
                }
                let boxed: Addrs = Box::new(addrs.into_iter());
                Ok(boxed)
            }
            Ok(Err(err)) => {
                let err: BoxError = Box::new(err);
                Err(err)
            }
            Err(join_err) => {
                if join_err.is_cancelled() {
                    let err: BoxError =
                        Box::new(io::Error::new(io::ErrorKind::Interrupted, join_err));
                    Err(err)
                } else {
                    panic!("background DNS resolution task failed: {join_err:?}")
                }
            }
        });

        Box::pin(future_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_loopback_v4() {
        assert!(is_blocked("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn blocks_rfc1918_ranges() {
        assert!(is_blocked("10.0.0.1".parse().unwrap()));
        assert!(is_blocked("172.16.5.5".parse().unwrap()));
        assert!(is_blocked("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn blocks_link_local_and_metadata() {
        assert!(is_blocked("169.254.169.254".parse().unwrap()));
    }

    #[test]
    fn blocks_zero_network() {
        assert!(is_blocked("0.0.0.0".parse().unwrap()));
        assert!(is_blocked("0.1.2.3".parse().unwrap()));
    }

    #[test]
    fn allows_public_v4() {
        assert!(!is_blocked("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn blocks_ipv6_loopback_and_private() {
        assert!(is_blocked("::1".parse().unwrap()));
        assert!(is_blocked("fc00::1".parse().unwrap()));
        assert!(is_blocked("fd12:3456::1".parse().unwrap()));
        assert!(is_blocked("fe80::1".parse().unwrap()));
    }

    #[test]
    fn allows_public_v6() {
        assert!(!is_blocked(
            "2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()
        ));
    }
}
