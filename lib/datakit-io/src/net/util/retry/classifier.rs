/// Determines whether or not a request should be retried.
///
/// This is the half of [`tower::retry::Policy`] that looks at the outcome of a request; how long to wait and how many
/// times to try is left to the policy.
pub trait RetryClassifier<Res, Error> {
    /// Returns `true` if the original request should be retried.
    fn should_retry(&self, response: &Result<Res, Error>) -> bool;
}

/// Retries server errors (5xx) and transport errors.
///
/// Client errors (4xx) are permanent rejections by the dataway (bad token, usage exceeded, malformed payload), and
/// retrying them cannot succeed.
#[derive(Clone, Debug, Default)]
pub struct ServerErrorClassifier;

impl<B, Error> RetryClassifier<http::Response<B>, Error> for ServerErrorClassifier {
    fn should_retry(&self, response: &Result<http::Response<B>, Error>) -> bool {
        match response {
            Ok(resp) => resp.status().is_server_error(),
            Err(_) => true,
        }
    }
}
