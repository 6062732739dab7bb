//! DNS resolution: a caching resolver for outgoing connections, and periodic watching of domains for address changes.

mod resolver;
pub use self::resolver::{CachingResolver, Resolver};

mod watch;
pub use self::watch::{DnsWatchError, DnsWatchRegistry, DnsWatcher};

use std::{io, net::IpAddr, time::Duration};

/// Resolves `host` to its set of IP addresses, sorted and deduplicated.
///
/// IP literals resolve to themselves without a lookup.
///
/// # Errors
///
/// If the lookup fails or does not complete within `timeout`, an error is returned.
pub async fn lookup_ips(host: &str, timeout: Duration) -> io::Result<Vec<IpAddr>> {
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("DNS lookup of '{}' timed out", host)))??;

    let mut ips = addrs.map(|addr| addr.ip()).collect::<Vec<_>>();
    ips.sort();
    ips.dedup();
    Ok(ips)
}
