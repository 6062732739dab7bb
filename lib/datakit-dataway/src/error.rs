use std::{error::Error, io};

use datakit_error::GenericError;
use datakit_point::{Category, UnknownCategory};
use http::StatusCode;
use snafu::Snafu;

use crate::filter::FilterError;

/// Errors raised while setting up a dataway, its endpoints or its sinkers.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum DatawayError {
    #[snafu(display("no dataway URL configured"))]
    NoUrls,

    #[snafu(display("invalid dataway URL '{}': {}", url, source))]
    InvalidUrl { url: String, source: url::ParseError },

    #[snafu(display("unsupported scheme '{}' in URL '{}'", scheme, url))]
    UnsupportedScheme { scheme: String, url: String },

    #[snafu(display("failed to set up HTTP client for '{}': {}", host, source))]
    HttpSetup { host: String, source: GenericError },

    #[snafu(display("invalid filter for sinker '{}': {}", url, source))]
    SinkerFilter { url: String, source: FilterError },

    #[snafu(display("invalid category for sinker '{}': {}", url, source))]
    SinkerCategory { url: String, source: UnknownCategory },
}

/// Errors raised while writing to, or pulling from, a dataway endpoint.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum WriteError {
    #[snafu(display("no URL for category '{}' and no dynamic URL set", category))]
    NoUrl { category: Category },

    #[snafu(display("invalid dynamic URL '{}': {}", url, source))]
    InvalidDynamicUrl { url: String, source: url::ParseError },

    #[snafu(display("failed to build request to '{}': {}", url, source))]
    BuildRequest { url: String, source: http::Error },

    #[snafu(display("failed to encode body: {}", source))]
    EncodeBody { source: io::Error },

    #[snafu(display("request terminated: {}", source))]
    RequestTerminated {
        source: Box<dyn Error + Send + Sync>,
    },

    #[snafu(display("failed to read response body: {}", source))]
    ReadResponse { source: hyper::Error },

    #[snafu(display("points rejected by dataway (HTTP {})", status))]
    WritePoints4xx { status: StatusCode },

    #[snafu(display("dataway internal error (HTTP {})", status))]
    Internal { status: StatusCode },

    #[snafu(display("datakit pull API not enabled on this endpoint"))]
    PullApiMissing,

    #[snafu(display("datakit pull failed with HTTP {}: {}", status, body))]
    PullFailed { status: StatusCode, body: String },

    #[snafu(display("no endpoint configured"))]
    NoEndpoint,
}

impl WriteError {
    /// Returns `true` if the dataway permanently rejected the data.
    ///
    /// Such data is never retried nor cached.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::WritePoints4xx { .. })
    }
}
