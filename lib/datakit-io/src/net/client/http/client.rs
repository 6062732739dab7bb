use std::time::Duration;

use bytes::Bytes;
use datakit_error::GenericError;
use datakit_tls::ClientTLSConfigBuilder;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_http_proxy::Proxy;
use hyper_util::{
    client::legacy::Builder,
    rt::{TokioExecutor, TokioTimer},
};
use tower::{
    retry::Policy, timeout::TimeoutLayer, util::BoxCloneSyncService, BoxError, Service as _, ServiceBuilder,
    ServiceExt as _,
};

use super::{conn::HttpsCapableConnectorBuilder, ApiTelemetryLayer};
use crate::net::{dns::Resolver, util::retry::NoopRetryPolicy};

/// An HTTP client.
///
/// Cloning is cheap, and clones share the same connection pool.
#[derive(Clone)]
pub struct HttpClient<B = Full<Bytes>> {
    inner: BoxCloneSyncService<Request<B>, Response<Incoming>, BoxError>,
}

impl HttpClient {
    /// Creates a new builder for configuring an HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

impl<B> HttpClient<B>
where
    B: Body + Send + 'static,
{
    /// Sends a request to the server, and waits for a response.
    ///
    /// If a retry policy is configured, the returned response is the one from the last attempt.
    ///
    /// # Errors
    ///
    /// If there was an error sending the request, an error will be returned.
    pub async fn send(&mut self, req: Request<B>) -> Result<Response<Incoming>, BoxError> {
        self.inner.ready().await?.call(req).await
    }
}

/// An HTTP client builder.
///
/// # Defaults
///
/// - support for both HTTP and HTTPS (uses platform's root certificates for server certificate validation)
/// - support for both HTTP/1.1 and HTTP/2 (automatically negotiated via ALPN)
/// - 30 second connect timeout, 30 second per-attempt request timeout
/// - connection pool with a 90 second idle timeout and at most 100 idle connections per host
/// - the system resolver, no proxy, no retries
#[derive(Clone)]
pub struct HttpClientBuilder<P = NoopRetryPolicy> {
    connector_builder: HttpsCapableConnectorBuilder,
    hyper_builder: Builder,
    tls_builder: ClientTLSConfigBuilder,
    retry_policy: P,
    request_timeout: Option<Duration>,
    api_telemetry: bool,
    proxies: Vec<Proxy>,
}

impl<P> HttpClientBuilder<P> {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connector_builder = self.connector_builder.with_connect_timeout(timeout);
        self
    }

    /// Sets the per-request timeout.
    ///
    /// The request timeout applies to each individual attempt, including each attempt made when retrying a failed
    /// request.
    ///
    /// Defaults to 30 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of idle connections per host.
    ///
    /// Defaults to 100.
    pub fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.hyper_builder.pool_max_idle_per_host(max);
        self
    }

    /// Sets the idle connection timeout.
    ///
    /// Defaults to 90 seconds.
    pub fn with_idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.hyper_builder.pool_idle_timeout(timeout);
        self
    }

    /// Sets the resolver used to look up host names.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.connector_builder = self.connector_builder.with_resolver(resolver);
        self
    }

    /// Enables HTTP tracing telemetry (DNS lookup and connect costs, new connections).
    pub fn with_http_trace(mut self, enabled: bool) -> Self {
        self.connector_builder = self.connector_builder.with_http_trace(enabled);
        self
    }

    /// Sets the retry policy to use when sending requests.
    ///
    /// Defaults to no retry policy. (i.e. requests are not retried)
    pub fn with_retry_policy<P2>(self, retry_policy: P2) -> HttpClientBuilder<P2> {
        HttpClientBuilder {
            connector_builder: self.connector_builder,
            hyper_builder: self.hyper_builder,
            tls_builder: self.tls_builder,
            retry_policy,
            request_timeout: self.request_timeout,
            api_telemetry: self.api_telemetry,
            proxies: self.proxies,
        }
    }

    /// Sets the proxies to be used for outgoing requests.
    pub fn with_proxies(mut self, proxies: Vec<Proxy>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Enables API latency telemetry.
    ///
    /// See [`ApiTelemetryLayer`] for more information.
    pub fn with_api_telemetry(mut self, enabled: bool) -> Self {
        self.api_telemetry = enabled;
        self
    }

    /// Sets the TLS configuration.
    pub fn with_tls_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ClientTLSConfigBuilder) -> ClientTLSConfigBuilder,
    {
        self.tls_builder = f(self.tls_builder);
        self
    }

    /// Builds the `HttpClient`.
    ///
    /// # Errors
    ///
    /// If there was an error building the TLS configuration for the client, or for connecting to the configured
    /// proxies, an error will be returned.
    pub fn build<B>(self) -> Result<HttpClient<B>, GenericError>
    where
        B: Body + Clone + Unpin + Send + Sync + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
        P: Policy<Request<B>, Response<Incoming>, BoxError> + Send + Sync + Clone + 'static,
        P::Future: Send,
    {
        let tls_config = self.tls_builder.build()?;
        let connector = self.connector_builder.build(tls_config);

        let client = if self.proxies.is_empty() {
            let proxy_connector = hyper_http_proxy::ProxyConnector::unsecured(connector);
            self.hyper_builder.build(proxy_connector)
        } else {
            let mut proxy_connector = hyper_http_proxy::ProxyConnector::new(connector)?;
            for proxy in self.proxies {
                proxy_connector.add_proxy(proxy);
            }
            self.hyper_builder.build(proxy_connector)
        };

        let service = ServiceBuilder::new()
            .retry(self.retry_policy)
            .option_layer(self.api_telemetry.then_some(ApiTelemetryLayer))
            .option_layer(self.request_timeout.map(TimeoutLayer::new))
            .service(client.map_err(BoxError::from));

        Ok(HttpClient {
            inner: BoxCloneSyncService::new(service),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        let mut hyper_builder = Builder::new(TokioExecutor::new());
        hyper_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90));

        Self {
            connector_builder: HttpsCapableConnectorBuilder::default(),
            hyper_builder,
            tls_builder: ClientTLSConfigBuilder::new(),
            retry_policy: NoopRetryPolicy,
            request_timeout: Some(Duration::from_secs(30)),
            api_telemetry: false,
            proxies: Vec::new(),
        }
    }
}
