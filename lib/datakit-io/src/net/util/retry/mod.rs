//! Retry policies for HTTP requests.

mod classifier;
pub use self::classifier::{RetryClassifier, ServerErrorClassifier};

mod lifecycle;
pub use self::lifecycle::{
    classify_transport_error, DefaultDebugRetryLifecycle, DynError, RetryLifecycle, SanitizedRequestUri,
    StandardHttpRetryLifecycle,
};

mod policy;
pub use self::policy::{FixedDelayRetryPolicy, NoopRetryPolicy};
