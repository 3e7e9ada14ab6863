use std::time::Duration;

use tokio::time::Instant;

use crate::properties::TestMemoizer;
use crate::{delayed_len, setup, TestCompute};

/// Fifty concurrent lookups each of two URLs, with a computation taking 100ms.
///
/// Only two computations happen, and everything finishes after roughly 100ms instead of the 5s
/// that serialized computations would take.
pub async fn two_urls<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::from_millis(100));
    let memo = new(compute.clone());

    let start = Instant::now();
    let lookups: Vec<_> = ["https://example.com", "https://other.com"]
        .into_iter()
        .flat_map(|url| std::iter::repeat(url).take(50))
        .map(|url| {
            let memo = memo.clone();
            tokio::spawn(async move { (url, memo.get(url.to_owned()).await) })
        })
        .collect();

    let results = futures::future::join_all(lookups).await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 100);
    for result in results {
        match result.unwrap() {
            ("https://example.com", value) => assert_eq!(value, Ok(19)),
            ("https://other.com", value) => assert_eq!(value, Ok(17)),
            (url, _) => panic!("unexpected url {url}"),
        }
    }

    assert_eq!(compute.calls(), 2);
    assert!(elapsed >= Duration::from_millis(100), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
}
