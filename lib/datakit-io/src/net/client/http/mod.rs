//! HTTP client for talking to dataways.

mod client;
pub use self::client::{HttpClient, HttpClientBuilder};

mod conn;
pub use self::conn::{HttpsCapableConnector, HttpsCapableConnectorBuilder};

mod proxy;
pub use self::proxy::new_proxy;

mod telemetry;
pub use self::telemetry::{normalize_api_path, ApiTelemetry, ApiTelemetryLayer};
