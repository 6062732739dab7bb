use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{Arc, RwLock, Weak},
    task::{Context, Poll},
    time::Duration,
};

use datakit_error::{generic_error, GenericError};
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use metrics::histogram;
use tokio::{runtime::Handle, time::Instant};
use tower::Service;
use tracing::{debug, warn};

use super::lookup_ips;

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A DNS resolver that caches lookups and refreshes them in the background.
///
/// Cached entries are re-resolved on a fixed interval by a background task, so that connections opened after a DNS
/// change pick up the new addresses without paying for a lookup on the request path. A failed refresh keeps the
/// previous addresses. The background task stops once every clone of the resolver has been dropped.
#[derive(Clone)]
pub struct CachingResolver {
    state: Arc<ResolverState>,
}

struct ResolverState {
    entries: RwLock<HashMap<String, Vec<IpAddr>>>,
    lookup_timeout: Duration,
}

impl ResolverState {
    fn cached(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(host).cloned()
    }

    fn store(&self, host: &str, ips: Vec<IpAddr>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(host.to_string(), ips);
    }

    async fn refresh(&self) {
        let hosts = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.keys().cloned().collect::<Vec<_>>()
        };

        for host in hosts {
            match lookup_ips(&host, self.lookup_timeout).await {
                Ok(ips) if !ips.is_empty() => self.store(&host, ips),
                Ok(_) => debug!(%host, "DNS refresh returned no addresses. Keeping cached addresses."),
                Err(e) => debug!(%host, error = %e, "DNS refresh failed. Keeping cached addresses."),
            }
        }
    }
}

impl CachingResolver {
    /// Creates a new `CachingResolver` that refreshes its entries every `refresh_interval`.
    ///
    /// # Errors
    ///
    /// The refresh task is spawned on the current Tokio runtime. If there is no runtime, an error is returned.
    pub fn new(refresh_interval: Duration) -> Result<Self, GenericError> {
        let handle = Handle::try_current().map_err(|e| generic_error!("No runtime available for DNS cache: {}", e))?;

        let state = Arc::new(ResolverState {
            entries: RwLock::new(HashMap::new()),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        });

        let weak_state = Arc::downgrade(&state);
        handle.spawn(run_refresh(weak_state, refresh_interval));

        Ok(Self { state })
    }

    /// Resolves `host`, returning cached addresses when available.
    ///
    /// # Errors
    ///
    /// If the host is not cached and the lookup fails, or returns no addresses, an error is returned.
    pub async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        if let Some(ips) = self.state.cached(host) {
            return Ok(ips);
        }

        let ips = lookup_ips(host, self.state.lookup_timeout).await?;
        if ips.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for '{}'", host),
            ));
        }

        self.state.store(host, ips.clone());
        Ok(ips)
    }

    /// Returns the number of cached hosts.
    pub fn cached_hosts(&self) -> usize {
        self.state.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn run_refresh(state: Weak<ResolverState>, refresh_interval: Duration) {
    loop {
        tokio::time::sleep(refresh_interval).await;

        let Some(state) = state.upgrade() else {
            debug!("DNS cache dropped. Stopping refresh task.");
            break;
        };
        state.refresh().await;
    }
}

#[derive(Clone)]
enum ResolverKind {
    Caching(CachingResolver),
    System(GaiResolver),
}

/// The resolver used by the HTTP connector.
///
/// Either a [`CachingResolver`] or the system resolver (`getaddrinfo` on a blocking thread).
#[derive(Clone)]
pub struct Resolver {
    kind: ResolverKind,
    http_trace: bool,
}

impl Resolver {
    /// Creates a resolver backed by the system resolver.
    pub fn system() -> Self {
        Self {
            kind: ResolverKind::System(GaiResolver::new()),
            http_trace: false,
        }
    }

    /// Creates a resolver backed by the given caching resolver.
    pub fn caching(resolver: CachingResolver) -> Self {
        Self {
            kind: ResolverKind::Caching(resolver),
            http_trace: false,
        }
    }

    /// Creates a caching resolver with the given refresh interval, falling back to the system resolver if the cache
    /// cannot be created.
    pub fn caching_or_system(refresh_interval: Duration) -> Self {
        match CachingResolver::new(refresh_interval) {
            Ok(resolver) => Self::caching(resolver),
            Err(e) => {
                warn!(error = %e, "Failed to create DNS cache. Falling back to system resolver.");
                Self::system()
            }
        }
    }

    /// Returns `true` if lookups go through a [`CachingResolver`].
    pub fn is_caching(&self) -> bool {
        matches!(self.kind, ResolverKind::Caching(_))
    }

    /// Records lookup durations in `datakit_io_http_dns_cost_seconds` when enabled.
    pub fn with_http_trace(mut self, enabled: bool) -> Self {
        self.http_trace = enabled;
        self
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::system()
    }
}

impl Service<Name> for Resolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match &mut self.kind {
            ResolverKind::Caching(_) => Poll::Ready(Ok(())),
            ResolverKind::System(gai) => gai.poll_ready(cx),
        }
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let http_trace = self.http_trace;
        let start = Instant::now();

        let lookup: Self::Future = match &mut self.kind {
            ResolverKind::Caching(resolver) => {
                let resolver = resolver.clone();
                Box::pin(async move {
                    let ips = resolver.resolve(name.as_str()).await?;
                    Ok(ips
                        .into_iter()
                        .map(|ip| SocketAddr::new(ip, 0))
                        .collect::<Vec<_>>()
                        .into_iter())
                })
            }
            ResolverKind::System(gai) => {
                let fut = gai.call(name);
                Box::pin(async move { Ok(fut.await?.collect::<Vec<_>>().into_iter()) })
            }
        };

        if !http_trace {
            return lookup;
        }

        Box::pin(async move {
            let result = lookup.await;
            histogram!("datakit_io_http_dns_cost_seconds").record(start.elapsed().as_secs_f64());
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_bypass_cache() {
        let resolver = CachingResolver::new(Duration::from_secs(60)).unwrap();
        let ips = resolver.resolve("10.1.2.3").await.unwrap();
        assert_eq!(ips, vec![IpAddr::from([10, 1, 2, 3])]);
        assert_eq!(resolver.cached_hosts(), 0);
    }

    #[tokio::test]
    async fn caches_lookups() {
        let resolver = CachingResolver::new(Duration::from_secs(60)).unwrap();
        let first = resolver.resolve("localhost").await.unwrap();
        assert!(!first.is_empty());
        assert_eq!(resolver.cached_hosts(), 1);

        let second = resolver.resolve("localhost").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cached_hosts(), 1);
    }

    #[test]
    fn falls_back_to_system_without_runtime() {
        assert!(CachingResolver::new(Duration::from_secs(60)).is_err());
        assert!(!Resolver::caching_or_system(Duration::from_secs(60)).is_caching());
    }

    #[tokio::test]
    async fn resolves_names_as_socket_addrs() {
        let mut resolver = Resolver::caching_or_system(Duration::from_secs(60));
        assert!(resolver.is_caching());

        let name = "localhost".parse::<Name>().unwrap();
        let addrs = resolver.call(name).await.unwrap().collect::<Vec<_>>();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.ip().is_loopback()));
    }
}
