use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use memoizer::Compute;
use thiserror::Error;

use crate::config::FetchConfig;

/// An error fetching the body of a URL.
///
/// This is cached by the memoizer together with the URL, so it needs to be cheaply clonable.
#[derive(Clone, Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {url}")]
    Request {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("failed to fetch {url}: status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("synthetic failure for {0}")]
    Synthetic(String),
}

/// Fetches the body of a URL via HTTP GET.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(client: reqwest::Client, url: String) -> Result<Bytes, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.clone(),
            source: Arc::new(source),
        };

        let response = client.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        response.bytes().await.map_err(request_error)
    }
}

impl Compute<String> for HttpFetcher {
    type Value = Bytes;
    type Error = FetchError;

    fn compute(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        tracing::debug!(url = %url, "fetching");
        Self::fetch(self.client.clone(), url).boxed()
    }
}

/// A stand-in for [`HttpFetcher`] that does not touch the network.
///
/// After sleeping for `delay`, the "body" of a URL is the URL itself. If `fail_every` is set,
/// every n-th computed URL fails instead.
#[derive(Clone, Debug)]
pub struct SyntheticFetcher {
    delay: Duration,
    fail_every: Option<usize>,
    computed: Arc<AtomicUsize>,
}

impl SyntheticFetcher {
    pub fn new(delay: Duration, fail_every: Option<usize>) -> Self {
        Self {
            delay,
            fail_every: fail_every.filter(|n| *n > 0),
            computed: Default::default(),
        }
    }
}

impl Compute<String> for SyntheticFetcher {
    type Value = Bytes;
    type Error = FetchError;

    fn compute(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        let n = self.computed.fetch_add(1, Ordering::Relaxed) + 1;
        let fail = self.fail_every.is_some_and(|every| n % every == 0);
        let delay = self.delay;

        async move {
            tokio::time::sleep(delay).await;
            if fail {
                return Err(FetchError::Synthetic(url));
            }
            Ok(Bytes::from(url))
        }
        .boxed()
    }
}

/// Either of the fetchers, so both can be wrapped by the same memoizer type.
#[derive(Clone, Debug)]
pub enum Fetcher {
    Http(HttpFetcher),
    Synthetic(SyntheticFetcher),
}

impl Compute<String> for Fetcher {
    type Value = Bytes;
    type Error = FetchError;

    fn compute(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        match self {
            Fetcher::Http(fetcher) => fetcher.compute(url),
            Fetcher::Synthetic(fetcher) => fetcher.compute(url),
        }
    }
}
