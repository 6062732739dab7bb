use std::{
    net::IpAddr,
    sync::{Arc, Mutex, PoisonError},
};

use datakit_io::net::dns::DnsWatcher;
use tracing::{info, warn};

use crate::endpoint::Endpoint;

/// Rebuilds the HTTP clients of every endpoint sharing a domain when that domain resolves to new addresses.
///
/// The first resolution only records the current addresses.
pub(crate) struct DnsCacher {
    domain: String,
    endpoints: Vec<Arc<Endpoint>>,
    last_ips: Mutex<Option<Vec<IpAddr>>>,
}

impl DnsCacher {
    pub(crate) fn new(domain: impl Into<String>, endpoints: Vec<Arc<Endpoint>>) -> Self {
        Self {
            domain: domain.into(),
            endpoints,
            last_ips: Mutex::new(None),
        }
    }
}

impl DnsWatcher for DnsCacher {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn on_resolved(&self, ips: &[IpAddr]) {
        let mut last_ips = self.last_ips.lock().unwrap_or_else(PoisonError::into_inner);
        match last_ips.as_deref() {
            None => {
                *last_ips = Some(ips.to_vec());
                return;
            }
            Some(last) if last == ips => return,
            Some(last) => info!(domain = %self.domain, old = ?last, new = ?ips, "Dataway addresses changed."),
        }
        *last_ips = Some(ips.to_vec());
        drop(last_ips);

        for endpoint in &self.endpoints {
            if let Err(e) = endpoint.setup_http() {
                warn!(host = endpoint.host(), error = %e, "Failed to rebuild HTTP client after DNS change.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint::EndpointOptions, usage::UsageMonitor};

    fn endpoint(url: &str) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(url, EndpointOptions::default(), UsageMonitor::default()).unwrap())
    }

    #[tokio::test]
    async fn rebuilds_clients_only_on_change() {
        let a = endpoint("http://dataway.example.com?token=tkn_a");
        let b = endpoint("http://dataway.example.com:9528?token=tkn_b");
        let cacher = DnsCacher::new("dataway.example.com", vec![a.clone(), b.clone()]);

        let first = [IpAddr::from([10, 0, 0, 1])];
        let second = [IpAddr::from([10, 0, 0, 1]), IpAddr::from([10, 0, 0, 2])];

        cacher.on_resolved(&first);
        cacher.on_resolved(&first);
        assert_eq!(a.http_setups(), 1);
        assert_eq!(b.http_setups(), 1);

        cacher.on_resolved(&second);
        assert_eq!(a.http_setups(), 2);
        assert_eq!(b.http_setups(), 2);

        cacher.on_resolved(&second);
        assert_eq!(a.http_setups(), 2);
    }
}
