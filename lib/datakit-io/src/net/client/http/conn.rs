use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use http::Uri;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioIo};
use metrics::{counter, histogram};
use rustls::ClientConfig;
use tokio::{net::TcpStream, time::Instant};
use tower::{BoxError, Service};

use crate::net::dns::Resolver;

/// A connector that supports HTTP or HTTPS.
///
/// Host names are resolved through a [`Resolver`], which is either the DNS-caching resolver or the system resolver.
/// With HTTP tracing enabled, the time to establish each new connection is recorded in
/// `datakit_io_http_connect_cost_seconds`, and new connections are counted in `datakit_io_http_new_conn_total`.
#[derive(Clone)]
pub struct HttpsCapableConnector {
    inner: HttpsConnector<HttpConnector<Resolver>>,
    http_trace: bool,
}

impl Service<Uri> for HttpsCapableConnector {
    type Response = MaybeHttpsStream<TokioIo<TcpStream>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let http_trace = self.http_trace;
        let host = dst.host().unwrap_or_default().to_string();
        let inner = self.inner.call(dst);

        Box::pin(async move {
            let start = Instant::now();
            let conn = inner.await?;

            if http_trace {
                histogram!("datakit_io_http_connect_cost_seconds").record(start.elapsed().as_secs_f64());
                counter!("datakit_io_http_new_conn_total", "host" => host).increment(1);
            }

            Ok(conn)
        })
    }
}

/// A builder for `HttpsCapableConnector`.
#[derive(Clone, Default)]
pub struct HttpsCapableConnectorBuilder {
    connect_timeout: Option<Duration>,
    resolver: Option<Resolver>,
    http_trace: bool,
}

impl HttpsCapableConnectorBuilder {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the resolver used to look up host names.
    ///
    /// Defaults to the system resolver.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Enables HTTP tracing telemetry for DNS lookups and connection establishment.
    ///
    /// Defaults to disabled.
    pub fn with_http_trace(mut self, enabled: bool) -> Self {
        self.http_trace = enabled;
        self
    }

    /// Builds the `HttpsCapableConnector` from the given TLS configuration.
    pub fn build(self, tls_config: ClientConfig) -> HttpsCapableConnector {
        let connect_timeout = self.connect_timeout.unwrap_or(Duration::from_secs(30));
        let resolver = self
            .resolver
            .unwrap_or_else(Resolver::system)
            .with_http_trace(self.http_trace);

        // Plain HTTP must stay allowed here, or wrapping this in an HTTPS connector breaks.
        let mut http_connector = HttpConnector::new_with_resolver(resolver);
        http_connector.set_connect_timeout(Some(connect_timeout));
        http_connector.enforce_http(false);

        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(http_connector);

        HttpsCapableConnector {
            inner: https_connector,
            http_trace: self.http_trace,
        }
    }
}
