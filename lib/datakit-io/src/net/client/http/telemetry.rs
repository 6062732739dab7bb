use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use http::{Request, Response};
use metrics::histogram;
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tower::{Layer, Service};

use crate::net::util::retry::{classify_transport_error, DynError};

/// Paths whose trailing segments carry secrets, and are collapsed to the given prefix.
const NORMALIZED_API_PREFIXES: &[&str] = &["/v1/check/token"];

/// Emits API latency telemetry for HTTP requests.
///
/// Every request sent through the wrapped service is timed until its response headers arrive (or it fails), and recorded
/// in the `datakit_io_dataway_api_latency_seconds` histogram with two labels:
///
/// - `api`: the request path, normalized with [`normalize_api_path`]
/// - `status`: the HTTP status text of the response, or the transport error class when no response was received
///
/// When placed inside a retry layer, each attempt is recorded separately.
#[derive(Clone, Debug, Default)]
pub struct ApiTelemetryLayer;

impl<S> Layer<S> for ApiTelemetryLayer {
    type Service = ApiTelemetry<S>;

    fn layer(&self, service: S) -> Self::Service {
        ApiTelemetry { service }
    }
}

/// Emits API latency telemetry for HTTP requests.
#[derive(Clone, Debug)]
pub struct ApiTelemetry<S> {
    service: S,
}

impl<B, B2, S> Service<Request<B>> for ApiTelemetry<S>
where
    S: Service<Request<B>, Response = Response<B2>>,
    S::Error: DynError,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ApiTelemetryFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let api = normalize_api_path(req.uri().path()).to_string();
        let fut = self.service.call(req);

        ApiTelemetryFuture {
            api,
            start: Instant::now(),
            fut,
        }
    }
}

pin_project! {
    /// Response future from [`ApiTelemetry`] services.
    pub struct ApiTelemetryFuture<F> {
        api: String,
        start: Instant,

        #[pin]
        fut: F,
    }
}

impl<F, B, E> Future for ApiTelemetryFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: DynError,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.fut.poll(cx));

        let status = match &result {
            Ok(response) => {
                let status = response.status();
                status.canonical_reason().unwrap_or(status.as_str()).to_string()
            }
            Err(e) => classify_transport_error(e.as_dyn_error()).to_string(),
        };

        histogram!("datakit_io_dataway_api_latency_seconds", "api" => std::mem::take(this.api), "status" => status)
            .record(this.start.elapsed().as_secs_f64());

        Poll::Ready(result)
    }
}

/// Normalizes a request path for use as a metric label.
///
/// Token check requests carry the token in the path itself, so they are collapsed to their common prefix.
pub fn normalize_api_path(path: &str) -> &str {
    NORMALIZED_API_PREFIXES
        .iter()
        .find(|prefix| path.starts_with(*prefix))
        .copied()
        .unwrap_or(path)
}
