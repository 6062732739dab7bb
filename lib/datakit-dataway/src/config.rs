use std::{collections::BTreeMap, time::Duration};

use bytesize::ByteSize;
use datakit_config::HumanDuration;
use serde::Deserialize;

use crate::endpoint::EndpointOptions;

const fn default_http_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

const fn default_idle_timeout() -> HumanDuration {
    HumanDuration::from_secs(90)
}

const fn default_max_idle_conns_per_host() -> usize {
    100
}

const fn default_max_retry_count() -> u32 {
    4
}

const fn default_retry_delay() -> HumanDuration {
    HumanDuration::from_secs(1)
}

const fn default_max_raw_body_size() -> ByteSize {
    ByteSize::mib(10)
}

const fn default_gzip() -> bool {
    true
}

const fn default_dns_cache_interval() -> Option<HumanDuration> {
    Some(HumanDuration::from_secs(60))
}

/// Dataway configuration.
///
/// Every field except `urls` has a default, so an empty document only fails on the missing URL list.
#[derive(Clone, Debug, Deserialize)]
pub struct DatawayConfiguration {
    /// Dataway URLs, each carrying its workspace token in the `token` query parameter.
    ///
    /// Every write is sent to all of them.
    pub urls: Vec<String>,

    /// Timeout for each HTTP request attempt, and for connecting.
    ///
    /// Defaults to 30 seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: HumanDuration,

    /// Proxy to send requests through.
    ///
    /// Only `http://` and `https://` proxies are supported. An invalid proxy is ignored with a warning.
    #[serde(default)]
    pub http_proxy: Option<String>,

    /// Maximum idle connections kept per host.
    ///
    /// Defaults to 100.
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,

    /// How long an idle connection is kept in the pool.
    ///
    /// Defaults to 90 seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: HumanDuration,

    /// Attempts made for each request, the first one included.
    ///
    /// Capped at 10. Defaults to 4.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Delay between two attempts of the same request.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: HumanDuration,

    /// Upper bound on the uncompressed size of a single request body.
    ///
    /// Defaults to 10 MiB.
    #[serde(default = "default_max_raw_body_size")]
    pub max_raw_body_size: ByteSize,

    /// Whether request bodies are gzip-compressed.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_gzip")]
    pub gzip: bool,

    /// Whether to record DNS, connect and new-connection telemetry.
    #[serde(default, rename = "enable_httptrace")]
    pub http_trace: bool,

    /// Whether to skip server certificate verification.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// How often cached DNS entries are refreshed, and destination hosts are checked for changed addresses.
    ///
    /// Set to `null` to use the system resolver without caching. Defaults to 60 seconds.
    #[serde(default = "default_dns_cache_interval")]
    pub dns_cache_interval: Option<HumanDuration>,

    /// Dataway APIs to enable on every endpoint.
    ///
    /// Empty means every write API plus the datakit pull API.
    #[serde(default)]
    pub apis: Vec<String>,

    /// Extra headers added to every request.
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,

    /// Global tags, sent along with every write in the `X-Global-Tags` header.
    #[serde(default)]
    pub global_tags: BTreeMap<String, String>,

    /// Whether the configured sinkers are used.
    #[serde(default)]
    pub enable_sinker: bool,

    /// Secondary destinations that divert matching points away from `urls`.
    #[serde(default)]
    pub sinkers: Vec<SinkerConfiguration>,
}

impl DatawayConfiguration {
    /// Creates a configuration for the given URLs with every other setting at its default.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            http_timeout: default_http_timeout(),
            http_proxy: None,
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            idle_timeout: default_idle_timeout(),
            max_retry_count: default_max_retry_count(),
            retry_delay: default_retry_delay(),
            max_raw_body_size: default_max_raw_body_size(),
            gzip: default_gzip(),
            http_trace: false,
            insecure_skip_verify: false,
            dns_cache_interval: default_dns_cache_interval(),
            apis: Vec::new(),
            http_headers: BTreeMap::new(),
            global_tags: BTreeMap::new(),
            enable_sinker: false,
            sinkers: Vec::new(),
        }
    }

    /// Returns the maximum raw body size, in bytes.
    pub fn max_raw_body_size(&self) -> usize {
        usize::try_from(self.max_raw_body_size.as_u64()).unwrap_or(usize::MAX)
    }

    /// Returns how often dataway hosts are re-resolved, or `None` when DNS caching is disabled.
    pub fn dns_watch_interval(&self) -> Option<Duration> {
        self.dns_cache_interval.map(Duration::from).filter(|interval| !interval.is_zero())
    }

    /// Builds the endpoint options shared by every endpoint of this dataway.
    ///
    /// `extra_headers` are added after the configured headers, and win on conflicts.
    pub(crate) fn endpoint_options(&self, extra_headers: BTreeMap<String, String>) -> EndpointOptions {
        let mut headers = self.http_headers.clone();
        headers.extend(extra_headers);

        let mut options = EndpointOptions::default()
            .with_http_timeout(self.http_timeout.into())
            .with_max_idle_conns_per_host(self.max_idle_conns_per_host)
            .with_idle_timeout(self.idle_timeout.into())
            .with_max_retry_count(self.max_retry_count)
            .with_retry_delay(self.retry_delay.into())
            .with_http_trace(self.http_trace)
            .with_insecure_skip_verify(self.insecure_skip_verify)
            .with_dns_cache_interval(self.dns_watch_interval())
            .with_http_headers(headers);

        if let Some(proxy) = self.http_proxy.as_deref().filter(|p| !p.is_empty()) {
            options = options.with_proxy(proxy);
        }

        if !self.apis.is_empty() {
            options = options.with_apis(self.apis.clone());
        }

        options
    }
}

/// Sinker configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SinkerConfiguration {
    /// Dataway URL that matching points are sent to.
    pub url: String,

    /// Proxy for this sinker only.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Category names this sinker applies to, such as `logging` or `metric`.
    #[serde(default)]
    pub categories: Vec<String>,

    /// Filter conditions selecting the points to divert.
    ///
    /// With no filters, every point of a configured category is diverted.
    #[serde(default)]
    pub filters: Vec<String>,
}
