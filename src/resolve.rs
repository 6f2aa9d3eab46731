//! Best-effort host resolution for capture targets.

use crate::Target;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::debug;

/// Upper bound on a single lookup so a dead resolver cannot stall a worker.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve a host name to its first address.
///
/// IP literals come back unchanged. Any failure yields `None`.
pub async fn resolve_host(name: &str) -> Option<IpAddr> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Some(ip);
    }
    if name.is_empty() {
        return None;
    }

    match timeout(RESOLVE_TIMEOUT, lookup_host((name, 0))).await {
        Ok(Ok(mut addrs)) => addrs.next().map(|addr| addr.ip()),
        Ok(Err(e)) => {
            debug!("Could not resolve {}: {}", name, e);
            None
        }
        Err(_) => {
            debug!("Resolving {} timed out after {:?}", name, RESOLVE_TIMEOUT);
            None
        }
    }
}

pub async fn resolve_target(target: &Target) -> Option<IpAddr> {
    let host = target.host()?;
    resolve_host(&host).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn test_ip_literals_resolve_to_themselves() {
        assert_eq!(resolve_host("192.0.2.7").await, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))));
        assert_eq!(resolve_host("::1").await, Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn test_empty_name_is_unresolved() {
        assert_eq!(resolve_host("").await, None);
    }

    #[tokio::test]
    async fn test_target_without_host_is_unresolved() {
        assert_eq!(resolve_target(&Target::from("http://")).await, None);
        assert_eq!(
            resolve_target(&Target::from("https://10.0.0.9:8443/admin")).await,
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))
        );
    }
}
