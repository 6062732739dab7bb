use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bytes::Bytes;
use datakit_error::{generic_error, GenericError};
use datakit_io::{
    diskcache::{FailCache, FailCacheError},
    net::dns::DnsWatchRegistry,
};
use datakit_point::{Category, Encoding, Point};
use futures::FutureExt as _;
use prost::Message as _;
use tracing::{debug, error, info, warn};

use crate::{
    body::Body,
    cache::CacheData,
    config::DatawayConfiguration,
    dnscacher::DnsCacher,
    endpoint::Endpoint,
    error::{DatawayError, WriteError},
    sinker::Sinker,
    usage::UsageMonitor,
    writer::Writer,
};

const GLOBAL_TAGS_HEADER: &str = "X-Global-Tags";

/// The dataway write path.
///
/// Every write first goes through the sinkers, in configuration order, each of them taking the points that match its
/// filters. Whatever remains is then written to every endpoint.
pub struct Dataway {
    endpoints: Vec<Arc<Endpoint>>,
    sinkers: Vec<Sinker>,
    gzip: bool,
    max_body_size: usize,
    usage: UsageMonitor,
}

impl Dataway {
    /// Creates a new `Dataway` from its configuration.
    ///
    /// When `dns_registry` is given, each distinct endpoint domain is watched, and the HTTP clients of the endpoints
    /// using it are rebuilt whenever it resolves to new addresses.
    ///
    /// # Errors
    ///
    /// If no URL is configured, or an endpoint or sinker cannot be set up, an error is returned.
    pub fn new(config: &DatawayConfiguration, dns_registry: Option<&DnsWatchRegistry>) -> Result<Self, DatawayError> {
        if config.urls.iter().all(|url| url.trim().is_empty()) {
            return Err(DatawayError::NoUrls);
        }

        let usage = UsageMonitor::default();
        let options = config.endpoint_options(global_headers(&config.global_tags));

        let endpoints = config
            .urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| Endpoint::new(url, options.clone(), usage.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let sinkers = if config.enable_sinker {
            config
                .sinkers
                .iter()
                .map(|sinker| Sinker::setup(sinker, options.clone(), usage.clone()))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        for endpoint in &endpoints {
            info!(endpoint = %endpoint, "Dataway endpoint added.");
        }

        let dataway = Self {
            endpoints,
            sinkers,
            gzip: config.gzip,
            max_body_size: config.max_raw_body_size(),
            usage,
        };

        if let Some(registry) = dns_registry {
            dataway.watch_dns(registry);
        }

        Ok(dataway)
    }

    fn watch_dns(&self, registry: &DnsWatchRegistry) {
        let mut by_domain: HashMap<&str, Vec<Arc<Endpoint>>> = HashMap::new();
        let all = self
            .endpoints
            .iter()
            .chain(self.sinkers.iter().map(Sinker::endpoint));
        for endpoint in all {
            by_domain.entry(endpoint.domain()).or_default().push(Arc::clone(endpoint));
        }

        for (domain, endpoints) in by_domain {
            if let Err(e) = registry.register(Arc::new(DnsCacher::new(domain, endpoints))) {
                warn!(domain, error = %e, "Failed to watch dataway domain.");
            }
        }
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn sinkers(&self) -> &[Sinker] {
        &self.sinkers
    }

    /// Returns the workspace usage flag shared by every endpoint.
    pub fn usage(&self) -> &UsageMonitor {
        &self.usage
    }

    /// Performs a write.
    ///
    /// In cache-clean mode, one entry of the writer's fail cache is replayed to every endpoint, and removed only if all
    /// of them accept it. Otherwise the writer's points are sunk, and the rest written to every endpoint.
    ///
    /// # Errors
    ///
    /// If the points cannot be encoded, an error is returned. Delivery failures are never returned: failed bodies are
    /// cached or dropped.
    pub async fn write(&self, mut writer: Writer) -> Result<(), WriteError> {
        writer.gzip = writer.gzip.or(Some(self.gzip));
        writer.max_body_size = writer.max_body_size.or(Some(self.max_body_size));

        if writer.is_cache_clean() {
            self.clean_cache(&writer).await;
            return Ok(());
        }

        let mut points = writer.take_points();
        if points.is_empty() {
            return Ok(());
        }

        for sinker in &self.sinkers {
            points = sinker.sink(&writer, points).await;
            if points.is_empty() {
                debug!(category = %writer.category(), "All points sunk.");
                return Ok(());
            }
        }

        self.write_to_endpoints(&writer, &points).await
    }

    async fn write_to_endpoints(&self, writer: &Writer, points: &[Point]) -> Result<(), WriteError> {
        let mut result = Ok(());
        for endpoint in &self.endpoints {
            if let Err(e) = endpoint.write_points(writer, points).await {
                error!(host = endpoint.host(), category = %writer.category(), error = %e, "Failed to write points.");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn clean_cache(&self, writer: &Writer) {
        let Some(fail_cache) = writer.fail_cache() else {
            return;
        };

        match self.replay_one(writer, fail_cache.as_ref()).await {
            Ok(()) => debug!("Replayed one cached entry."),
            Err(e) if e.is_no_data() => {}
            Err(e) => warn!(error = %e, "Cached entry not replayed."),
        }
    }

    /// Replays the whole fail cache, and returns the number of entries handled.
    ///
    /// Replay stops at the first entry that cannot be delivered, leaving it and every later entry in the cache.
    ///
    /// # Errors
    ///
    /// If an entry cannot be delivered, or the cache cannot be read, an error is returned.
    pub async fn flush(&self, fail_cache: Arc<dyn FailCache>) -> Result<usize, FailCacheError> {
        fail_cache.rotate().await?;

        let writer = Writer::cache_clean(Arc::clone(&fail_cache));
        let mut handled = 0;
        loop {
            match self.replay_one(&writer, fail_cache.as_ref()).await {
                Ok(()) => handled += 1,
                Err(e) if e.is_no_data() => return Ok(handled),
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay_one(&self, writer: &Writer, fail_cache: &dyn FailCache) -> Result<(), FailCacheError> {
        fail_cache
            .get(Box::new(move |data| self.replay(writer, data).boxed()))
            .await
    }

    /// Replays a cached entry to every endpoint.
    ///
    /// Entries that can never be delivered are dropped. An error keeps the entry in the cache.
    async fn replay(&self, writer: &Writer, data: Bytes) -> Result<(), GenericError> {
        let cached = match CacheData::decode(data) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable cache entry.");
                return Ok(());
            }
        };

        let (Some(category), Some(encoding)) = (
            Category::from_i32(cached.category),
            Encoding::from_i32(cached.payload_type),
        ) else {
            warn!(
                category = cached.category,
                payload_type = cached.payload_type,
                "Dropping cache entry of unknown category or encoding."
            );
            return Ok(());
        };

        let body = match Body::from_cached(category, encoding, cached.payload).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%category, error = %e, "Dropping corrupted cache entry.");
                return Ok(());
            }
        };

        for endpoint in &self.endpoints {
            match endpoint.write_point_data(writer, &body).await {
                Ok(()) => {}
                Err(WriteError::NoUrl { .. }) => {
                    warn!(%category, host = endpoint.host(), "No URL for cached entry. Entry dropped.");
                    return Ok(());
                }
                Err(e) => return Err(generic_error!("failed to replay cached {} entry: {}", category, e)),
            }
        }

        debug!(%category, points = body.npts(), bytes = body.len(), "Cached entry replayed.");
        Ok(())
    }

    /// Calls the datakit pull API of the first endpoint.
    ///
    /// # Errors
    ///
    /// If there is no endpoint, or the pull fails, an error is returned.
    pub async fn pull(&self, args: &str) -> Result<Bytes, WriteError> {
        let endpoint = self.endpoints.first().ok_or(WriteError::NoEndpoint)?;
        endpoint.pull(args).await
    }
}

/// Builds the headers every endpoint adds to its requests.
fn global_headers(global_tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(
        http::header::USER_AGENT.as_str().to_string(),
        format!(
            "datakit-{}-{}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            env!("CARGO_PKG_VERSION")
        ),
    );

    if !global_tags.is_empty() {
        let tags = global_tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        headers.insert(GLOBAL_TAGS_HEADER.to_string(), tags);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tags_header_is_sorted() {
        let tags = BTreeMap::from([
            ("zone".to_string(), "b".to_string()),
            ("host".to_string(), "web-1".to_string()),
        ]);
        let headers = global_headers(&tags);

        assert_eq!(headers.get(GLOBAL_TAGS_HEADER).map(String::as_str), Some("host=web-1,zone=b"));
        assert!(headers["user-agent"].starts_with("datakit-"));
    }

    #[test]
    fn no_global_tags_no_header() {
        assert!(!global_headers(&BTreeMap::new()).contains_key(GLOBAL_TAGS_HEADER));
    }

    #[tokio::test]
    async fn no_urls() {
        let config = DatawayConfiguration::from_urls(Vec::<String>::new());
        assert!(matches!(Dataway::new(&config, None), Err(DatawayError::NoUrls)));

        let config = DatawayConfiguration::from_urls([" "]);
        assert!(matches!(Dataway::new(&config, None), Err(DatawayError::NoUrls)));
    }

    #[tokio::test]
    async fn pull_without_api() {
        let mut config = DatawayConfiguration::from_urls(["http://127.0.0.1:1?token=tkn_x"]);
        config.apis = vec!["/v1/write/logging".to_string()];
        let dataway = Dataway::new(&config, None).unwrap();

        assert!(matches!(dataway.pull("filters=true").await, Err(WriteError::PullApiMissing)));
    }
}
