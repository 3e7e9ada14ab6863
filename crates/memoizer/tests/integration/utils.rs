use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use memoizer::{Compute, Counted};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
/// Initializes logs, capturing only the logs of the `memoizer` crate.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoizer=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestError(pub String);

/// Computes the length of its key, after sleeping for a while.
///
/// Keys starting with `slow` take 500ms, keys starting with `fast` are computed immediately, and
/// keys starting with `fail` result in a [`TestError`].
#[derive(Clone, Debug)]
pub struct DelayedLen {
    delay: Duration,
}

impl DelayedLen {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn delay_for(&self, key: &str) -> Duration {
        if key.starts_with("slow") {
            Duration::from_millis(500)
        } else if key.starts_with("fast") {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

impl Compute<String> for DelayedLen {
    type Value = usize;
    type Error = TestError;

    fn compute(&self, key: String) -> BoxFuture<'static, Result<usize, TestError>> {
        let delay = self.delay_for(&key);
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if key.starts_with("fail") {
                return Err(TestError(format!("cannot compute {key}")));
            }
            Ok(key.len())
        }
        .boxed()
    }
}

pub type TestCompute = Counted<DelayedLen>;

/// Creates a counted [`DelayedLen`] computation.
pub fn delayed_len(delay: Duration) -> TestCompute {
    Counted::new(DelayedLen::new(delay))
}

/// Generates the shared test suite for one memoizer implementation.
///
/// The constructor must accept a [`TestCompute`].
macro_rules! memoizer_tests {
    ($design:ident, $new:expr) => {
        mod $design {
            use super::*;
            use crate::properties;

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_at_most_once() {
                properties::at_most_once($new).await;
            }

            #[tokio::test(start_paused = true)]
            async fn test_no_cross_key_blocking() {
                properties::no_cross_key_blocking($new).await;
            }

            #[tokio::test]
            async fn test_cached_error() {
                properties::cached_error($new).await;
            }

            #[tokio::test(start_paused = true)]
            async fn test_concurrent_error() {
                properties::concurrent_error($new).await;
            }

            #[tokio::test]
            async fn test_sequential() {
                properties::sequential($new).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
            async fn test_stress() {
                properties::stress($new).await;
            }

            #[tokio::test(start_paused = true)]
            async fn test_scenario() {
                crate::scenario::two_urls($new).await;
            }
        }
    };
}
