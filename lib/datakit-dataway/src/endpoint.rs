use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        PoisonError, RwLock,
    },
    time::Duration,
};

use bytes::Bytes;
use datakit_error::GenericError;
use datakit_io::{
    diskcache::FailCache,
    net::{
        client::http::{new_proxy, HttpClient},
        dns::Resolver,
        util::retry::{FixedDelayRetryPolicy, ServerErrorClassifier, StandardHttpRetryLifecycle},
    },
};
use datakit_point::{Category, Point};
use http::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, Request, StatusCode,
};
use http_body_util::{BodyExt as _, Full};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, error, info, warn};
use url::{Position, Url};

use crate::{
    body::{build_bodies, Body},
    cache::CacheData,
    error::*,
    telemetry::{record_body_sent, STATUS_UNKNOWN},
    usage::UsageMonitor,
    writer::Writer,
};

/// Path of the datakit pull API.
pub const DATAKIT_PULL_PATH: &str = "/v1/datakit/pull";

const MAX_RETRY_COUNT: u32 = 10;
const BEYOND_DATA_USAGE: &str = "beyondDataUsage";

/// Categories whose data is only cached when the writer asks for everything to be cached.
const NEVER_CACHED: &[Category] = &[
    Category::Metric,
    Category::MetricDeprecated,
    Category::Object,
    Category::CustomObject,
    Category::DynamicDw,
];

/// Endpoint options.
///
/// # Defaults
///
/// - every write API plus the datakit pull API
/// - 30 second HTTP timeout, no proxy
/// - at most 100 idle connections per host, kept for 90 seconds
/// - 4 attempts per request, 1 second apart
/// - DNS cache refreshed every 60 seconds
#[derive(Clone, Debug)]
pub struct EndpointOptions {
    apis: Vec<String>,
    proxy: Option<String>,
    http_timeout: Duration,
    max_idle_conns_per_host: usize,
    idle_timeout: Duration,
    max_retry_count: u32,
    retry_delay: Duration,
    http_headers: BTreeMap<String, String>,
    insecure_skip_verify: bool,
    http_trace: bool,
    dns_cache_interval: Option<Duration>,
}

impl EndpointOptions {
    /// Sets the dataway APIs to enable.
    pub fn with_apis(mut self, apis: Vec<String>) -> Self {
        self.apis = apis;
        self
    }

    /// Sets the proxy to send requests through.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the timeout for connecting, and for each request attempt.
    ///
    /// A zero timeout is ignored.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.http_timeout = timeout;
        }
        self
    }

    /// Sets the maximum number of idle connections kept per host.
    ///
    /// Zero is ignored.
    pub fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        if max > 0 {
            self.max_idle_conns_per_host = max;
        }
        self
    }

    /// Sets how long idle connections are kept.
    ///
    /// A zero timeout is ignored.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.idle_timeout = timeout;
        }
        self
    }

    /// Sets the number of attempts per request, the first one included.
    ///
    /// Zero is ignored, and values above 10 are capped.
    pub fn with_max_retry_count(mut self, count: u32) -> Self {
        if count > 0 {
            self.max_retry_count = count.min(MAX_RETRY_COUNT);
        }
        self
    }

    /// Sets the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the headers added to every request.
    ///
    /// Headers with an empty value are ignored.
    pub fn with_http_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            if value.is_empty() {
                warn!(header = %name, "Ignoring HTTP header with empty value.");
                continue;
            }
            self.http_headers.insert(name, value);
        }
        self
    }

    /// Sets whether server certificates are left unverified.
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Sets whether DNS, connect and new-connection telemetry is recorded.
    pub fn with_http_trace(mut self, enabled: bool) -> Self {
        self.http_trace = enabled;
        self
    }

    /// Sets the DNS cache refresh interval, or disables the cache with `None`.
    pub fn with_dns_cache_interval(mut self, interval: Option<Duration>) -> Self {
        self.dns_cache_interval = interval;
        self
    }

    pub fn http_headers(&self) -> &BTreeMap<String, String> {
        &self.http_headers
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            apis: Category::with_write_paths()
                .filter_map(Category::url_path)
                .map(str::to_string)
                .chain(std::iter::once(DATAKIT_PULL_PATH.to_string()))
                .collect(),
            proxy: None,
            http_timeout: Duration::from_secs(30),
            max_idle_conns_per_host: 100,
            idle_timeout: Duration::from_secs(90),
            max_retry_count: 4,
            retry_delay: Duration::from_secs(1),
            http_headers: BTreeMap::new(),
            insecure_skip_verify: false,
            http_trace: false,
            dns_cache_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// A single dataway destination.
///
/// An endpoint owns the HTTP client used to reach its host. The client can be rebuilt at any time with
/// [`setup_http`][Self::setup_http], for example when the host resolves to new addresses: requests already in flight
/// complete on the previous client.
pub struct Endpoint {
    scheme: String,
    host: String,
    domain: String,
    token: String,
    category_urls: HashMap<String, String>,
    options: EndpointOptions,
    usage: UsageMonitor,
    client: RwLock<HttpClient>,
    http_setups: AtomicU32,
}

impl Endpoint {
    /// Creates an endpoint for the given dataway URL.
    ///
    /// The workspace token is taken from the `token` query parameter, and the full query is kept on every API URL.
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed, does not use `http` or `https`, or the HTTP client cannot be built, an error is
    /// returned.
    pub fn new(raw_url: &str, options: EndpointOptions, usage: UsageMonitor) -> Result<Self, DatawayError> {
        let url = Url::parse(raw_url).context(InvalidUrl { url: raw_url })?;
        let scheme = url.scheme().to_string();
        if !matches!(scheme.as_str(), "http" | "https") {
            return Err(DatawayError::UnsupportedScheme {
                scheme,
                url: raw_url.to_string(),
            });
        }

        let host = url[Position::BeforeHost..Position::AfterPort].to_string();
        let domain = url.host_str().unwrap_or_default().to_string();
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        let mut category_urls = HashMap::new();
        for api in &options.apis {
            let api_url = match url.query().filter(|q| !q.is_empty()) {
                Some(query) => format!("{}://{}{}?{}", scheme, host, api, query),
                None => format!("{}://{}{}", scheme, host, api),
            };
            info!(api = %api, url = %api_url, "Registered dataway API.");
            category_urls.insert(api.clone(), api_url);
        }

        let client = build_client(&host, &options).context(HttpSetup { host: &host })?;

        Ok(Self {
            scheme,
            host,
            domain,
            token,
            category_urls,
            options,
            usage,
            client: RwLock::new(client),
            http_setups: AtomicU32::new(1),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host, with its port if the URL had one.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the host, without its port.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the full URL of every enabled API, keyed by API path.
    pub fn category_urls(&self) -> &HashMap<String, String> {
        &self.category_urls
    }

    /// Returns the full URL used to write data of the given category, if the category has an enabled write API.
    pub fn category_url(&self, category: Category) -> Option<&str> {
        category
            .url_path()
            .and_then(|path| self.category_urls.get(path))
            .map(String::as_str)
    }

    /// Returns how many HTTP clients this endpoint has built so far.
    pub fn http_setups(&self) -> u32 {
        self.http_setups.load(Ordering::Relaxed)
    }

    /// Rebuilds the HTTP client, dropping every pooled connection.
    ///
    /// On error, the current client is kept.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn setup_http(&self) -> Result<(), GenericError> {
        let client = build_client(&self.host, &self.options)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
        self.http_setups.fetch_add(1, Ordering::Relaxed);
        debug!(host = %self.host, "Rebuilt dataway HTTP client.");
        Ok(())
    }

    fn client(&self) -> HttpClient {
        self.client.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Writes `points` as one or more bodies.
    ///
    /// Bodies that cannot be delivered are cached or dropped, see [`write_body`][Self::write_body].
    ///
    /// # Errors
    ///
    /// If the bodies cannot be built, an error is returned.
    pub async fn write_points(&self, writer: &Writer, points: &[Point]) -> Result<(), WriteError> {
        let bodies = build_bodies(writer.category(), points, writer.max_body_size(), writer.gzip())
            .await
            .context(EncodeBody)?;

        for body in bodies {
            self.write_body(writer, body).await;
        }

        Ok(())
    }

    /// Sends a body, caching it on failure when possible.
    ///
    /// Rejected bodies (HTTP 4xx) are dropped. Other failures put the body in the writer's fail cache, unless there is
    /// none, or the body's category is not cached and the writer does not ask for everything to be cached.
    pub async fn write_body(&self, writer: &Writer, body: Body) {
        let e = match self.write_point_data(writer, &body).await {
            Ok(()) => return,
            Err(e) => e,
        };

        if e.is_rejected() {
            return;
        }

        let Some(fail_cache) = writer.fail_cache() else {
            warn!(category = %body.category(), points = body.npts(), error = %e, "No fail cache set. Data dropped.");
            return;
        };

        if !writer.cache_all() && NEVER_CACHED.contains(&body.category()) {
            debug!(category = %body.category(), points = body.npts(), "Category not cached. Data dropped.");
            return;
        }

        put_cache(fail_cache.as_ref(), &body).await;
    }

    /// Sends a single body to the URL of its category, or to the writer's dynamic URL.
    ///
    /// # Errors
    ///
    /// If the dataway rejects the body (HTTP 4xx), [`WriteError::WritePoints4xx`] is returned. Any other failure, once
    /// retries are exhausted, returns a retryable error.
    pub async fn write_point_data(&self, writer: &Writer, body: &Body) -> Result<(), WriteError> {
        let mut status = STATUS_UNKNOWN.to_string();
        let result = self.post_body(writer, body, &mut status).await;

        if !writer.is_cache_clean() {
            record_body_sent(body, &status);
        }

        result
    }

    async fn post_body(&self, writer: &Writer, body: &Body, status_text: &mut String) -> Result<(), WriteError> {
        let url = self.body_url(writer, body)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header("X-Points", body.npts())
            .header(CONTENT_TYPE, body.encoding().content_type())
            .header("X-Pkg-Id", new_pkg_id());
        if body.is_gzipped() {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        let mut req = builder
            .body(Full::new(body.buf().clone()))
            .context(BuildRequest { url: url.as_str() })?;

        // Writer headers come last, and win.
        append_headers(req.headers_mut(), &self.options.http_headers);
        append_headers(req.headers_mut(), writer.http_headers());

        debug!(url = %url, bytes = body.len(), points = body.npts(), "Posting body.");

        let resp = match self.client().send(req).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(url = %url, proxy = ?self.options.proxy, error = %e, "Failed to send request.");
                return Err(WriteError::RequestTerminated { source: e });
            }
        };

        let status = resp.status();
        *status_text = status_text_of(status);
        let resp_body = resp.into_body().collect().await.context(ReadResponse)?.to_bytes();

        match status.as_u16() / 100 {
            2 => {
                debug!(url = %url, bytes = body.len(), gzip = body.is_gzipped(), "Posted body.");
                if url.contains("/v1/write/") {
                    self.usage.clear();
                }
                Ok(())
            }
            4 => {
                let resp_body = String::from_utf8_lossy(&resp_body);
                error!(url = %url, bytes = body.len(), status = %status, body = %resp_body, "Dataway rejected body. Data dropped.");

                if status == StatusCode::FORBIDDEN && resp_body.contains(BEYOND_DATA_USAGE) {
                    self.usage.set_beyond_usage(chrono::Utc::now().timestamp());
                }
                Err(WriteError::WritePoints4xx { status })
            }
            _ => {
                error!(url = %url, bytes = body.len(), status = %status, body = %String::from_utf8_lossy(&resp_body), "Failed to post body.");
                Err(WriteError::Internal { status })
            }
        }
    }

    fn body_url(&self, writer: &Writer, body: &Body) -> Result<String, WriteError> {
        if let Some(url) = self.category_url(body.category()) {
            return Ok(url.to_string());
        }

        let dynamic_url = writer.dynamic_url().context(NoUrl {
            category: body.category(),
        })?;
        Url::parse(dynamic_url).context(InvalidDynamicUrl { url: dynamic_url })?;
        debug!(category = %body.category(), url = %dynamic_url, "Using dynamic URL.");
        Ok(dynamic_url.to_string())
    }

    /// Calls the datakit pull API with the given query arguments, and returns the response body.
    ///
    /// # Errors
    ///
    /// If the pull API is not enabled, the request fails, or the response status is not 200, an error is returned.
    pub async fn pull(&self, args: &str) -> Result<Bytes, WriteError> {
        let base = self.category_urls.get(DATAKIT_PULL_PATH).context(PullApiMissing)?;
        let separator = if base.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", base, separator, args);

        let mut req = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Full::new(Bytes::new()))
            .context(BuildRequest { url: url.as_str() })?;
        append_headers(req.headers_mut(), &self.options.http_headers);

        let resp = self.client().send(req).await.map_err(|e| {
            error!(url = %url, error = %e, "Datakit pull failed.");
            WriteError::RequestTerminated { source: e }
        })?;

        let status = resp.status();
        let body = resp.into_body().collect().await.context(ReadResponse)?.to_bytes();
        if status != StatusCode::OK {
            return Err(WriteError::PullFailed {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut apis = self.category_urls.keys().map(String::as_str).collect::<Vec<_>>();
        apis.sort_unstable();
        write!(f, "[host: {}][token: {}][apis: {}]", self.host, self.token, apis.join(","))
    }
}

async fn put_cache(fail_cache: &dyn FailCache, body: &Body) {
    let data = CacheData::from_body(body).to_bytes();
    let len = data.len();
    match fail_cache.put(data).await {
        Ok(()) => debug!(category = %body.category(), bytes = len, "Cached failed body."),
        Err(e) => error!(category = %body.category(), bytes = len, error = %e, "Failed to cache body. Data dropped."),
    }
}

fn build_client(host: &str, options: &EndpointOptions) -> Result<HttpClient, GenericError> {
    let resolver = match options.dns_cache_interval {
        Some(interval) => Resolver::caching_or_system(interval),
        None => Resolver::system(),
    };

    let mut proxies = Vec::new();
    if let Some(proxy) = &options.proxy {
        match new_proxy(proxy) {
            Ok(p) => {
                info!(host, proxy = %proxy, "Using dataway proxy.");
                proxies.push(p);
            }
            Err(e) => warn!(proxy = %proxy, error = %e, "Invalid proxy. No proxy set."),
        }
    }

    let retry_policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, options.max_retry_count, options.retry_delay)
        .with_retry_lifecycle(StandardHttpRetryLifecycle);

    let insecure_skip_verify = options.insecure_skip_verify;
    HttpClient::builder()
        .with_connect_timeout(options.http_timeout)
        .with_request_timeout(options.http_timeout)
        .with_max_idle_conns_per_host(options.max_idle_conns_per_host)
        .with_idle_conn_timeout(options.idle_timeout)
        .with_resolver(resolver)
        .with_http_trace(options.http_trace)
        .with_proxies(proxies)
        .with_api_telemetry(true)
        .with_tls_config(|tls| tls.with_insecure_skip_verify(insecure_skip_verify))
        .with_retry_policy(retry_policy)
        .build()
}

fn append_headers(headers: &mut http::HeaderMap, extra: &BTreeMap<String, String>) {
    for (name, value) in extra {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid HTTP header."),
        }
    }
}

fn status_text_of(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), str::to_string)
}

/// Returns a new, unique package ID.
///
/// The dataway uses it to trace a body across retries and hops.
fn new_pkg_id() -> String {
    static SEQ: AtomicU32 = AtomicU32::new(0);

    let now = chrono::Utc::now().timestamp();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
    format!("dk_{:08x}{:08x}{:06x}", now, rand::random::<u32>(), seq)
}
