use std::{
    collections::HashSet,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use snafu::Snafu;
use tokio::{runtime::Handle, task::JoinSet};
use tracing::{debug, info};

use super::lookup_ips;

/// Error type for DNS watch registration.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DnsWatchError {
    /// The watcher returned an empty domain.
    #[snafu(display("cannot watch an empty domain"))]
    EmptyDomain,

    /// A watcher for the domain is already registered.
    #[snafu(display("domain '{}' is already being watched", domain))]
    AlreadyWatched { domain: String },

    /// The registry was shut down.
    #[snafu(display("DNS watch registry has been shut down"))]
    ShutDown,

    /// There is no Tokio runtime to spawn the watch task on.
    #[snafu(display("no runtime available to run the DNS watch task"))]
    NoRuntime,
}

/// Something interested in the addresses a domain resolves to.
pub trait DnsWatcher: Send + Sync + 'static {
    /// Returns the domain to watch.
    fn domain(&self) -> &str;

    /// Called with the sorted, deduplicated addresses of the domain after every successful resolution.
    fn on_resolved(&self, ips: &[IpAddr]);
}

/// Periodically resolves registered domains and reports their addresses to watchers.
///
/// Each registered watcher gets its own background task, which resolves the domain immediately and then once per
/// interval. Failed lookups are logged and skipped. All tasks are stopped on [`shutdown`][Self::shutdown] or when the
/// registry is dropped.
pub struct DnsWatchRegistry {
    interval: Duration,
    lookup_timeout: Duration,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    domains: HashSet<String>,
    tasks: JoinSet<()>,
    shut_down: bool,
}

impl DnsWatchRegistry {
    /// Creates a new `DnsWatchRegistry` that resolves watched domains every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            lookup_timeout: Duration::from_secs(10),
            state: Mutex::new(RegistryState {
                domains: HashSet::new(),
                tasks: JoinSet::new(),
                shut_down: false,
            }),
        }
    }

    /// Returns the check interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Registers a watcher.
    ///
    /// # Errors
    ///
    /// If the watcher's domain is empty or already watched, the registry has been shut down, or there is no Tokio
    /// runtime, an error is returned.
    pub fn register(&self, watcher: Arc<dyn DnsWatcher>) -> Result<(), DnsWatchError> {
        let domain = watcher.domain().to_string();
        if domain.is_empty() {
            return Err(DnsWatchError::EmptyDomain);
        }

        let handle = Handle::try_current().map_err(|_| DnsWatchError::NoRuntime)?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.shut_down {
            return Err(DnsWatchError::ShutDown);
        }
        if !state.domains.insert(domain.clone()) {
            return Err(DnsWatchError::AlreadyWatched { domain });
        }

        debug!(%domain, interval = ?self.interval, "Watching domain for DNS changes.");
        state
            .tasks
            .spawn_on(run_watch(watcher, self.interval, self.lookup_timeout), &handle);

        Ok(())
    }

    /// Returns the number of watched domains.
    pub fn watched(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).domains.len()
    }

    /// Stops all watch tasks. Later registrations fail.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shut_down = true;
        state.domains.clear();
        state.tasks.abort_all();
        info!("DNS watch registry shut down.");
    }
}

async fn run_watch(watcher: Arc<dyn DnsWatcher>, interval: Duration, lookup_timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match lookup_ips(watcher.domain(), lookup_timeout).await {
            Ok(ips) if !ips.is_empty() => watcher.on_resolved(&ips),
            Ok(_) => debug!(domain = watcher.domain(), "DNS lookup returned no addresses."),
            Err(e) => debug!(domain = watcher.domain(), error = %e, "DNS lookup failed."),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use tokio::sync::Notify;

    use super::*;

    struct CountingWatcher {
        domain: String,
        calls: AtomicUsize,
        last: Mutex<Vec<IpAddr>>,
        notify: Notify,
    }

    impl CountingWatcher {
        fn new(domain: &str) -> Arc<Self> {
            Arc::new(Self {
                domain: domain.to_string(),
                calls: AtomicUsize::new(0),
                last: Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }
    }

    impl DnsWatcher for CountingWatcher {
        fn domain(&self) -> &str {
            &self.domain
        }

        fn on_resolved(&self, ips: &[IpAddr]) {
            *self.last.lock().unwrap() = ips.to_vec();
            self.calls.fetch_add(1, SeqCst);
            self.notify.notify_one();
        }
    }

    #[tokio::test]
    async fn resolves_immediately_then_on_interval() {
        let registry = DnsWatchRegistry::new(Duration::from_millis(20));
        let watcher = CountingWatcher::new("127.0.0.1");
        registry.register(watcher.clone()).unwrap();

        watcher.notify.notified().await;
        assert_eq!(*watcher.last.lock().unwrap(), vec![IpAddr::from([127, 0, 0, 1])]);

        watcher.notify.notified().await;
        assert!(watcher.calls.load(SeqCst) >= 2);
    }

    #[tokio::test]
    async fn rejects_duplicates_and_empty_domains() {
        let registry = DnsWatchRegistry::new(Duration::from_secs(60));
        registry.register(CountingWatcher::new("127.0.0.1")).unwrap();

        assert!(matches!(
            registry.register(CountingWatcher::new("127.0.0.1")),
            Err(DnsWatchError::AlreadyWatched { .. })
        ));
        assert!(matches!(
            registry.register(CountingWatcher::new("")),
            Err(DnsWatchError::EmptyDomain)
        ));
        assert_eq!(registry.watched(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_watching() {
        let registry = DnsWatchRegistry::new(Duration::from_millis(10));
        let watcher = CountingWatcher::new("127.0.0.1");
        registry.register(watcher.clone()).unwrap();
        watcher.notify.notified().await;

        registry.shutdown();
        assert_eq!(registry.watched(), 0);
        assert!(matches!(
            registry.register(CountingWatcher::new("::1")),
            Err(DnsWatchError::ShutDown)
        ));

        // Let the aborted task wind down, then make sure no more resolutions happen.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = watcher.calls.load(SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(watcher.calls.load(SeqCst), calls);
    }

    #[test]
    fn requires_runtime() {
        let registry = DnsWatchRegistry::new(Duration::from_secs(60));
        assert!(matches!(
            registry.register(CountingWatcher::new("127.0.0.1")),
            Err(DnsWatchError::NoRuntime)
        ));
    }
}
