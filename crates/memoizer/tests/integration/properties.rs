use std::time::Duration;

use memoizer::{MemoError, Memoizer};
use tokio::time::Instant;

use crate::{delayed_len, setup, TestCompute, TestError};

/// The bounds shared by all memoizers under test.
pub trait TestMemoizer:
    Memoizer<String, Value = usize, Error = TestError> + Clone + 'static
{
}
impl<M> TestMemoizer for M where
    M: Memoizer<String, Value = usize, Error = TestError> + Clone + 'static
{
}

/// Spawns `count` concurrent lookups of `key`.
fn spawn_lookups<M: TestMemoizer>(
    memo: &M,
    key: &str,
    count: usize,
) -> Vec<tokio::task::JoinHandle<Result<usize, MemoError<TestError>>>> {
    (0..count)
        .map(|_| {
            let memo = memo.clone();
            let key = key.to_owned();
            tokio::spawn(async move { memo.get(key).await })
        })
        .collect()
}

/// Many concurrent lookups of the same key run the computation exactly once, and all of them
/// get the same result.
pub async fn at_most_once<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::from_millis(50));
    let memo = new(compute.clone());

    let lookups = spawn_lookups(&memo, "X", 32);
    for result in futures::future::join_all(lookups).await {
        assert_eq!(result.unwrap(), Ok(1));
    }

    assert_eq!(compute.calls(), 1);
}

/// A slow computation does not hold up lookups of other keys.
pub async fn no_cross_key_blocking<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::ZERO);
    let memo = new(compute.clone());

    let mut slow = spawn_lookups(&memo, "slow-key", 1);
    let slow = slow.remove(0);
    // make sure the slow computation is running
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(compute.calls(), 1);

    let start = Instant::now();
    assert_eq!(memo.get("fast-key".into()).await, Ok(8));
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(!slow.is_finished());

    assert_eq!(slow.await.unwrap(), Ok(8));
    assert!(start.elapsed() >= Duration::from_millis(450));
    assert_eq!(compute.calls(), 2);
}

/// A failed computation is remembered and returned again without computing it again.
pub async fn cached_error<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::ZERO);
    let memo = new(compute.clone());

    let expected = Err(MemoError::Compute(TestError(
        "cannot compute fail-once".into(),
    )));
    assert_eq!(memo.get("fail-once".into()).await, expected);
    assert_eq!(memo.get("fail-once".into()).await, expected);
    assert_eq!(memo.get("fail-once".into()).await, expected);

    // an error does not affect other keys
    assert_eq!(memo.get("fine".into()).await, Ok(4));

    assert_eq!(compute.calls(), 2);
}

/// All concurrent callers of a failing key observe the identical error.
pub async fn concurrent_error<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::from_millis(100));
    let memo = new(compute.clone());

    let lookups = spawn_lookups(&memo, "fail-concurrently", 10);
    for result in futures::future::join_all(lookups).await {
        let error = result.unwrap().unwrap_err().into_compute();
        assert_eq!(
            error,
            Some(TestError("cannot compute fail-concurrently".into()))
        );
    }

    assert_eq!(compute.calls(), 1);
}

/// Sequential lookups compute each distinct key exactly once.
pub async fn sequential<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::from_millis(1));
    let memo = new(compute.clone());

    let keys = ["a", "bb", "a", "ccc", "bb", "a", "dddd"];
    for key in keys {
        assert_eq!(memo.get(key.into()).await, Ok(key.len()));
    }

    assert_eq!(compute.calls(), 4);
}

/// Hammers a handful of keys from many threads at once.
pub async fn stress<M: TestMemoizer>(new: impl FnOnce(TestCompute) -> M) {
    setup();

    let compute = delayed_len(Duration::from_millis(5));
    let memo = new(compute.clone());

    let keys: Vec<String> = (0..8).map(|i| "k".repeat(i + 1)).collect();
    let lookups: Vec<_> = (0..400)
        .map(|i| {
            let memo = memo.clone();
            let key = keys[i % keys.len()].clone();
            tokio::spawn(async move {
                let expected = key.len();
                (memo.get(key).await, expected)
            })
        })
        .collect();

    for lookup in futures::future::join_all(lookups).await {
        let (result, expected) = lookup.unwrap();
        assert_eq!(result, Ok(expected));
    }

    assert_eq!(compute.calls(), keys.len());
}
