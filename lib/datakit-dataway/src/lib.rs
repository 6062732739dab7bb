//! The dataway write path.
//!
//! Points are handed to a [`Dataway`] through a [`Writer`]. The dataway diverts the points matching its [`Sinker`]s to
//! their own destinations, splits the rest into bounded, compressed bodies, and posts them to every configured
//! [`Endpoint`]. Bodies that cannot be delivered are put in a fail cache, to be replayed later with a cache-clean write.

mod body;
pub use self::body::{build_bodies, Body, MAX_KODO_BODY};

mod cache;
pub use self::cache::CacheData;

mod config;
pub use self::config::{DatawayConfiguration, SinkerConfiguration};

mod dataway;
pub use self::dataway::Dataway;

mod dnscacher;

mod endpoint;
pub use self::endpoint::{Endpoint, EndpointOptions, DATAKIT_PULL_PATH};

mod error;
pub use self::error::{DatawayError, WriteError};

pub mod filter;

mod sinker;
pub use self::sinker::Sinker;

mod telemetry;

mod token;
pub use self::token::{check_token, TokenError};

mod usage;
pub use self::usage::UsageMonitor;

mod writer;
pub use self::writer::Writer;
