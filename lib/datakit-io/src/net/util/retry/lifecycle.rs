use std::{borrow::Cow, error::Error as _, fmt, io, time::Duration};

use http::StatusCode;
use metrics::counter;
use tracing::{debug, warn};

/// Hooks called by a retry policy as it makes decisions about a request.
pub trait RetryLifecycle<Req, Res, Error> {
    /// Called after a request has been classified as retryable, before sleeping for `retry_delay`.
    fn before_retry(&self, req: &Req, res: &Result<Res, Error>, retry_delay: Duration, attempt: u32);

    /// Called when a request completes without needing to be retried.
    fn after_success(&self, req: &Req, res: &Result<Res, Error>);

    /// Called when a request is still retryable but the attempt budget has been used up.
    fn on_exhausted(&self, _req: &Req, _res: &Result<Res, Error>, _attempts: u32) {}
}

/// A default retry lifecycle that emits basic debug logs when retrying requests and when requests succeed.
#[derive(Clone, Debug, Default)]
pub struct DefaultDebugRetryLifecycle;

impl<Req, Res, Error> RetryLifecycle<Req, Res, Error> for DefaultDebugRetryLifecycle {
    fn before_retry(&self, _: &Req, _: &Result<Res, Error>, retry_delay: Duration, attempt: u32) {
        debug!(attempt, "Retrying request after {:?}.", retry_delay);
    }

    fn after_success(&self, _: &Req, _: &Result<Res, Error>) {
        debug!("Request succeeded.");
    }
}

/// A standard HTTP retry lifecycle that emits contextual information about HTTP requests and responses.
///
/// Every retry is logged with the sanitized request URI and a categorized description of the failure, and counted in
/// `datakit_io_http_retry_total`, labelled by the request path and a status: the HTTP status text for server errors, or
/// the transport error class (see [`classify_transport_error`]) when no response was received.
#[derive(Clone, Debug, Default)]
pub struct StandardHttpRetryLifecycle;

impl<B, B2, E> RetryLifecycle<http::Request<B>, http::Response<B2>, E> for StandardHttpRetryLifecycle
where
    E: DynError,
{
    fn before_retry(
        &self, req: &http::Request<B>, res: &Result<http::Response<B2>, E>, retry_delay: Duration, attempt: u32,
    ) {
        let request_uri = SanitizedRequestUri(req.uri());
        let categorized_error = CategorizedError::try_categorize(res);

        warn!(attempt, %request_uri, "{}. Retrying after {:?}.", categorized_error, retry_delay);

        counter!("datakit_io_http_retry_total", "api" => req.uri().path().to_string(), "status" => categorized_error.status_label())
            .increment(1);
    }

    fn after_success(&self, req: &http::Request<B>, _: &Result<http::Response<B2>, E>) {
        let request_uri = SanitizedRequestUri(req.uri());
        debug!(%request_uri, "Request succeeded.");
    }

    fn on_exhausted(&self, req: &http::Request<B>, res: &Result<http::Response<B2>, E>, attempts: u32) {
        let request_uri = SanitizedRequestUri(req.uri());
        let categorized_error = CategorizedError::try_categorize(res);

        warn!(attempts, %request_uri, "{}. Giving up.", categorized_error);
    }
}

/// Displays a request URI without its query string.
///
/// Dataway URLs carry the workspace token in the query, which must never end up in logs.
pub struct SanitizedRequestUri<'a>(pub &'a http::Uri);

impl fmt::Display for SanitizedRequestUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(scheme), Some(host)) = (self.0.scheme_str(), self.0.host()) {
            write!(f, "{}://{}", scheme, host)?;
            if let Some(port) = self.0.port_u16() {
                write!(f, ":{}", port)?;
            }
        }

        write!(f, "{}", self.0.path())
    }
}

/// Classifies a transport error into a short, stable label.
///
/// The error's source chain is walked looking for timeouts and well-known socket errors. Anything unrecognized is
/// reported as `unwrapped-url-error`.
pub fn classify_transport_error(error: &(dyn std::error::Error + 'static)) -> &'static str {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<tower::timeout::error::Elapsed>() || err.is::<tokio::time::error::Elapsed>() {
            return "timeout";
        }

        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            match io_error.kind() {
                io::ErrorKind::TimedOut => return "timeout",
                io::ErrorKind::ConnectionRefused => return "connection-refused",
                io::ErrorKind::ConnectionReset => return "reset-by-peer",
                io::ErrorKind::NetworkUnreachable => return "network-is-unreachable",
                _ => {
                    if let Some(inner) = io_error.get_ref() {
                        current = Some(inner as &(dyn std::error::Error + 'static));
                        continue;
                    }
                }
            }
        }

        current = err.source();
    }

    "unwrapped-url-error"
}

enum CategorizedError {
    Client(String, &'static str),
    Tls(String),
    Http(StatusCode),
    Other(String, &'static str),
}

impl CategorizedError {
    fn try_categorize<B, E>(res: &Result<http::Response<B>, E>) -> Self
    where
        E: DynError,
    {
        match res {
            Ok(resp) => Self::Http(resp.status()),
            Err(e) => {
                let error = e.as_dyn_error();
                Self::extract_nested(error, classify_transport_error(error))
            }
        }
    }

    fn extract_nested(error: &(dyn std::error::Error + 'static), class: &'static str) -> Self {
        if let Some(hyper_error) = error.downcast_ref::<hyper_util::client::legacy::Error>() {
            return match hyper_error.source() {
                Some(source) => Self::extract_nested(source, class),
                None => Self::Client(hyper_error.to_string(), class),
            };
        }

        if let Some(rustls_error) = error.downcast_ref::<rustls::Error>() {
            return Self::Tls(rustls_error_to_string(rustls_error).into_owned());
        }

        if let Some(io_error) = error.downcast_ref::<io::Error>() {
            return match io_error.get_ref() {
                Some(source) => Self::extract_nested(source, class),
                None => Self::Other(io_error.to_string(), class),
            };
        }

        Self::Other(error.to_string(), class)
    }

    fn status_label(&self) -> String {
        match self {
            Self::Http(status) => status.canonical_reason().unwrap_or(status.as_str()).to_string(),
            Self::Tls(_) => "tls".to_string(),
            Self::Client(_, class) | Self::Other(_, class) => class.to_string(),
        }
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(reason, _) => write!(f, "Request failed due to a client error: {}", reason),
            Self::Tls(reason) => write!(f, "Request failed due to a TLS error: {}", reason),
            Self::Http(status_code) => write!(
                f,
                "Server responded with non-success status code {}",
                status_code.as_str()
            ),
            Self::Other(reason, _) => write!(f, "Request failed: {}", reason),
        }
    }
}

fn rustls_error_to_string(error: &rustls::Error) -> Cow<'static, str> {
    match error {
        rustls::Error::InvalidCertificate(cert_error) => match cert_error {
            rustls::CertificateError::Expired => "peer certificate expired".into(),
            rustls::CertificateError::NotValidYet => "peer certificate not valid yet".into(),
            rustls::CertificateError::UnknownIssuer => {
                "peer certificate chain is not issued by a known root certificate".into()
            }
            rustls::CertificateError::NotValidForName => "peer certificate is not valid for the host name".into(),
            other => format!("peer certificate is invalid: {:?}", other).into(),
        },
        other => other.to_string().into(),
    }
}

// Marker trait for accepting generically-typed errors that can be downcasted to dynamically-dispatched trait references.
pub trait DynError {
    fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static);
}

impl DynError for Box<dyn std::error::Error + Send + Sync> {
    fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static) {
        &**self
    }
}

impl DynError for io::Error {
    fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static) {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_uri_strips_token() {
        let uri: http::Uri = "https://openway.example.com:9528/v1/write/logging?token=tkn_secret".parse().unwrap();
        assert_eq!(
            SanitizedRequestUri(&uri).to_string(),
            "https://openway.example.com:9528/v1/write/logging"
        );
    }

    #[test]
    fn transport_error_classes() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_transport_error(&refused), "connection-refused");

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify_transport_error(&reset), "reset-by-peer");

        let unreachable = io::Error::from(io::ErrorKind::NetworkUnreachable);
        assert_eq!(classify_transport_error(&unreachable), "network-is-unreachable");

        let elapsed: Box<dyn std::error::Error + Send + Sync> = Box::new(tower::timeout::error::Elapsed::new());
        assert_eq!(classify_transport_error(elapsed.as_dyn_error()), "timeout");

        let wrapped = io::Error::other(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(classify_transport_error(&wrapped), "timeout");

        let other = io::Error::other("boom");
        assert_eq!(classify_transport_error(&other), "unwrapped-url-error");
    }

    #[test]
    fn status_labels() {
        let res: Result<http::Response<()>, io::Error> = Ok(http::Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(())
            .unwrap());
        assert_eq!(CategorizedError::try_categorize(&res).status_label(), "Service Unavailable");

        let res: Result<http::Response<()>, io::Error> = Err(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(CategorizedError::try_categorize(&res).status_label(), "timeout");
    }
}
