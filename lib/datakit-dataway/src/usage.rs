use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use metrics::gauge;
use tracing::info;

/// Tracks whether the workspace exceeded its data usage.
///
/// The dataway rejects writes with a `beyondDataUsage` body once the workspace is over quota. The flag is set to the
/// Unix time of that rejection, and cleared by the next successful write. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct UsageMonitor {
    beyond_usage: Arc<AtomicI64>,
}

impl UsageMonitor {
    /// Marks the workspace as over quota at `unix_secs`.
    pub fn set_beyond_usage(&self, unix_secs: i64) {
        self.beyond_usage.store(unix_secs, Ordering::Relaxed);
        gauge!("datakit_io_dataway_beyond_usage").set(unix_secs as f64);
        info!(since = unix_secs, "Workspace is beyond its data usage.");
    }

    /// Clears the over-quota flag, if set.
    pub fn clear(&self) {
        if self.beyond_usage.swap(0, Ordering::Relaxed) > 0 {
            gauge!("datakit_io_dataway_beyond_usage").set(0.0);
            info!("Workspace is back within its data usage.");
        }
    }

    /// Returns the Unix time at which the workspace went over quota, if it still is.
    pub fn beyond_usage(&self) -> Option<i64> {
        match self.beyond_usage.load(Ordering::Relaxed) {
            0 => None,
            since => Some(since),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_are_shared() {
        let monitor = UsageMonitor::default();
        let shared = monitor.clone();
        assert_eq!(monitor.beyond_usage(), None);

        shared.set_beyond_usage(1_700_000_000);
        assert_eq!(monitor.beyond_usage(), Some(1_700_000_000));

        monitor.clear();
        assert_eq!(shared.beyond_usage(), None);
    }
}
