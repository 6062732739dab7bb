use std::{future::Ready, time::Duration};

use tokio::time::{sleep, Sleep};
use tower::retry::Policy;

use super::{DefaultDebugRetryLifecycle, RetryClassifier, RetryLifecycle};

/// A retry policy that never retries.
#[derive(Clone, Debug, Default)]
pub struct NoopRetryPolicy;

impl<Req, Res, Error> Policy<Req, Res, Error> for NoopRetryPolicy {
    type Future = Ready<()>;

    fn retry(&mut self, _: &mut Req, _: &mut Result<Res, Error>) -> Option<Self::Future> {
        None
    }

    fn clone_request(&mut self, _: &Req) -> Option<Req> {
        None
    }
}

/// A bounded retry policy with a fixed delay between attempts.
///
/// Requests classified as retryable are sent again after `delay`, up to `max_attempts` attempts in total (the initial
/// attempt included). The attempt counter lives in the policy itself: `tower::retry::Retry` clones the policy for every
/// call, so each request starts from a fresh budget.
#[derive(Clone, Debug)]
pub struct FixedDelayRetryPolicy<C, L = DefaultDebugRetryLifecycle> {
    classifier: C,
    retry_lifecycle: L,
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
}

impl<C> FixedDelayRetryPolicy<C> {
    /// Creates a new `FixedDelayRetryPolicy` with the given classifier, attempt budget and delay.
    ///
    /// A `max_attempts` of zero is treated as one: the request is always sent at least once.
    pub fn new(classifier: C, max_attempts: u32, delay: Duration) -> Self {
        Self {
            classifier,
            retry_lifecycle: DefaultDebugRetryLifecycle,
            max_attempts: max_attempts.max(1),
            delay,
            attempts: 1,
        }
    }
}

impl<C, L> FixedDelayRetryPolicy<C, L> {
    /// Sets the retry lifecycle for this policy.
    pub fn with_retry_lifecycle<L2>(self, retry_lifecycle: L2) -> FixedDelayRetryPolicy<C, L2> {
        FixedDelayRetryPolicy {
            classifier: self.classifier,
            retry_lifecycle,
            max_attempts: self.max_attempts,
            delay: self.delay,
            attempts: self.attempts,
        }
    }

    /// Returns the maximum number of attempts, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<C, L, Req, Res, Error> Policy<Req, Res, Error> for FixedDelayRetryPolicy<C, L>
where
    C: RetryClassifier<Res, Error>,
    L: RetryLifecycle<Req, Res, Error>,
    Req: Clone,
{
    type Future = Sleep;

    fn retry(&mut self, request: &mut Req, response: &mut Result<Res, Error>) -> Option<Self::Future> {
        if !self.classifier.should_retry(response) {
            self.retry_lifecycle.after_success(request, response);
            return None;
        }

        if self.attempts >= self.max_attempts {
            self.retry_lifecycle.on_exhausted(request, response, self.attempts);
            return None;
        }

        self.retry_lifecycle
            .before_retry(request, response, self.delay, self.attempts);
        self.attempts += 1;

        Some(sleep(self.delay))
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicU32, Ordering::SeqCst},
            Arc,
        },
    };

    use http::StatusCode;
    use tower::{retry::Retry, service_fn, ServiceExt as _};

    use super::*;
    use crate::net::util::retry::ServerErrorClassifier;

    fn status_service(
        calls: Arc<AtomicU32>, statuses: Vec<StatusCode>,
    ) -> impl tower::Service<http::Request<()>, Response = http::Response<()>, Error = Infallible> + Clone {
        service_fn(move |_req: http::Request<()>| {
            let call = calls.fetch_add(1, SeqCst) as usize;
            let status = statuses.get(call).copied().unwrap_or(StatusCode::OK);
            async move {
                let mut resp = http::Response::new(());
                *resp.status_mut() = status;
                Ok::<_, Infallible>(resp)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = status_service(Arc::clone(&calls), vec![StatusCode::INTERNAL_SERVER_ERROR; 10]);
        let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, 4, Duration::from_secs(1));

        let resp = Retry::new(policy, svc).oneshot(http::Request::new(())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = status_service(
            Arc::clone(&calls),
            vec![StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE, StatusCode::OK],
        );
        let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, 4, Duration::from_millis(200));

        let resp = Retry::new(policy, svc).oneshot(http::Request::new(())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(calls.load(SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = status_service(Arc::clone(&calls), vec![StatusCode::FORBIDDEN; 4]);
        let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, 4, Duration::from_secs(1));

        let resp = Retry::new(policy, svc).oneshot(http::Request::new(())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = status_service(Arc::clone(&calls), vec![StatusCode::INTERNAL_SERVER_ERROR; 3]);
        let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, 3, Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        let _ = Retry::new(policy, svc).oneshot(http::Request::new(())).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(calls.load(SeqCst), 3);
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, 0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }
}
