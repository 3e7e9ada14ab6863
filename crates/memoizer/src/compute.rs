use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

/// A possibly slow, possibly failing computation of a value for a key.
///
/// This is the function wrapped by a memoizer. Calling it twice for the same key is assumed to be
/// wasteful, but not unsafe.
///
/// Any closure returning a future of a `Result` implements this trait:
///
/// ```
/// use memoizer::Compute;
///
/// fn assert_compute<C: Compute<String>>(_: &C) {}
///
/// let compute = |url: String| async move { Ok::<_, String>(url.len()) };
/// assert_compute(&compute);
/// ```
pub trait Compute<K>: Send + Sync + 'static {
    /// The computed value, handed out as a clone to every caller.
    type Value: Clone + Send + Sync + 'static;
    /// The error of a failed computation, cached and cloned just like a value.
    type Error: Clone + Send + Sync + 'static;

    /// Computes the value for the given key.
    ///
    /// The returned future is spawned as a separate task, so it must not borrow from `self`.
    fn compute(&self, key: K) -> BoxFuture<'static, Result<Self::Value, Self::Error>>;
}

impl<K, F, Fut, V, E> Compute<K> for F
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn compute(&self, key: K) -> BoxFuture<'static, Result<V, E>> {
        self(key).boxed()
    }
}

/// A [`Compute`] that counts how often the wrapped computation has been invoked.
///
/// Clones share the same counter.
#[derive(Debug)]
pub struct Counted<C> {
    inner: Arc<C>,
    calls: Arc<AtomicUsize>,
}

impl<C> Clone for Counted<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<C> Counted<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: Default::default(),
        }
    }

    /// The number of computations started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<K, C: Compute<K>> Compute<K> for Counted<C> {
    type Value = C::Value;
    type Error = C::Error;

    fn compute(&self, key: K) -> BoxFuture<'static, Result<Self::Value, Self::Error>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compute(key)
    }
}
