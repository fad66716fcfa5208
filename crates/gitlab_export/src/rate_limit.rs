use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// GitLab.com allows 2000 authenticated requests per minute; 5/sec stays well clear.
pub const GITLAB_DEFAULT_RPS: u32 = 5;

/// Proactive client-side rate limiter.
///
/// GitLab answers excess traffic with 429 and a long cool-down, so large
/// self-managed exports can opt into pacing requests up front instead.
///
/// # Example
///
/// ```ignore
/// let limiter = ApiRateLimiter::new(GITLAB_DEFAULT_RPS);
///
/// // Before each API call:
/// limiter.wait().await;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per second.
    ///
    /// A value of 0 is treated as 1.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(rate_limiter),
        }
    }

    /// Wait until a request is allowed by the rate limiter.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}
