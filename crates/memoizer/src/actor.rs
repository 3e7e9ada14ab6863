use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use sentry::{Hub, SentryFutureExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::compute::Compute;
use crate::config::MemoConfig;
use crate::error::{MemoError, MemoResult};

/// Becomes `Some` exactly once, when the computation for a key has finished.
type Readiness<V, E> = watch::Receiver<Option<Result<V, E>>>;

struct Request<K, V, E> {
    key: K,
    response: oneshot::Sender<MemoResult<V, E>>,
}

/// A memoizer whose map is owned exclusively by a single worker task.
///
/// Callers never touch the map: [`get`](Self::get) sends the key to the worker and waits for the
/// reply. The worker spawns one task per newly requested key to run the computation, and one task
/// per request to wait for that key's result and forward it to the caller. The worker itself
/// never waits on a computation, so requests for different keys never wait on each other.
///
/// The worker runs until [`close`](Self::close) is called or all handles are dropped. Calling
/// `get` after `close` is a programming error and returns [`MemoError::Closed`].
pub struct MemoActor<K, C: Compute<K>> {
    name: Arc<str>,
    requests: mpsc::Sender<Request<K, C::Value, C::Error>>,
    shutdown: CancellationToken,
}

impl<K, C: Compute<K>> Clone for MemoActor<K, C> {
    fn clone(&self) -> Self {
        MemoActor {
            name: Arc::clone(&self.name),
            requests: self.requests.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<K, C: Compute<K>> std::fmt::Debug for MemoActor<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoActor")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<K, C: Compute<K>> MemoActor<K, C> {
    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the worker from accepting new requests.
    ///
    /// Requests that were already accepted are still answered, and their computations run to
    /// completion. Calling this more than once has no further effect.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(memo = self.name(), "closing memoizer");
        }
        self.shutdown.cancel();
    }

    /// Returns `true` if [`close`](Self::close) has been called on this or any cloned handle.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<K, C> MemoActor<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Compute<K>,
{
    /// Creates the memoizer and spawns its worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(compute: C) -> Self {
        Self::with_config(&MemoConfig::default(), compute)
    }

    /// Creates the memoizer and spawns its worker, see [`new`](Self::new).
    pub fn with_config(config: &MemoConfig, compute: C) -> Self {
        let name: Arc<str> = config.name.as_str().into();
        let (requests, receiver) = mpsc::channel(config.request_queue_size.max(1));
        let shutdown = CancellationToken::new();

        let worker = Worker {
            name: Arc::clone(&name),
            compute: Arc::new(compute),
            entries: HashMap::new(),
        };
        let span = tracing::debug_span!("memoizer.worker", memo = &*name);
        tokio::spawn(worker.serve(receiver, shutdown.clone()).instrument(span));

        MemoActor {
            name,
            requests,
            shutdown,
        }
    }

    /// Returns the value for `key`, computing it on first access.
    ///
    /// Concurrent requests for the same key share a single computation. Its result, success or
    /// error, is remembered and returned to all later callers without computing it again.
    ///
    /// Returns [`MemoError::Closed`] if the memoizer has been closed.
    pub async fn get(&self, key: K) -> MemoResult<C::Value, C::Error> {
        metric!(counter("memo.access") += 1, "memo" => self.name());

        if self.is_closed() {
            return Err(MemoError::Closed);
        }

        let (response, receiver) = oneshot::channel();
        self.requests
            .send(Request { key, response })
            .await
            .map_err(|_| MemoError::Closed)?;

        // The response is only dropped unanswered if the worker shut down with this request
        // still in its queue.
        receiver.await.unwrap_or(Err(MemoError::Closed))
    }
}

/// The task owning the map of all requested keys.
struct Worker<K, C: Compute<K>> {
    name: Arc<str>,
    compute: Arc<C>,
    entries: HashMap<K, Readiness<C::Value, C::Error>>,
}

impl<K, C> Worker<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Compute<K>,
{
    async fn serve(
        mut self,
        mut requests: mpsc::Receiver<Request<K, C::Value, C::Error>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(request);
        }

        tracing::debug!(keys = self.entries.len(), "memoizer worker stopped");
    }

    fn handle(&mut self, request: Request<K, C::Value, C::Error>) {
        let Request { key, response } = request;

        let ready = match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                metric!(counter("memo.channel.hit") += 1, "memo" => &self.name);
                tracing::trace!("deduplicated lookup");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                metric!(counter("memo.channel.miss") += 1, "memo" => &self.name);
                let (sender, ready) = watch::channel(None);

                let computation = run_computation(
                    Arc::clone(&self.name),
                    Arc::clone(&self.compute),
                    entry.key().clone(),
                    sender,
                );
                tokio::spawn(computation.bind_hub(Hub::new_from_top(Hub::current())));

                entry.insert(ready).clone()
            }
        };

        tokio::spawn(deliver(ready, response));
    }
}

/// Runs the computation for `key` and publishes the result to everybody waiting on it.
async fn run_computation<K, C: Compute<K>>(
    name: Arc<str>,
    compute: Arc<C>,
    key: K,
    sender: watch::Sender<Option<Result<C::Value, C::Error>>>,
) {
    metric!(counter("memo.computation") += 1, "memo" => &name);
    tracing::debug!(memo = &*name, "starting computation");
    let start = Instant::now();

    let result = compute
        .compute(key)
        .instrument(tracing::debug_span!("memoizer.compute", memo = &*name))
        .await;

    metric!(timer("memo.computation.duration") = start.elapsed(), "memo" => &name);
    tracing::debug!(memo = &*name, ok = result.is_ok(), "finished computation");
    sender.send_replace(Some(result));
}

/// Waits for a key's result and forwards it to a single caller.
async fn deliver<V: Clone, E: Clone>(
    mut ready: Readiness<V, E>,
    response: oneshot::Sender<MemoResult<V, E>>,
) {
    let result = match ready.wait_for(Option::is_some).await {
        Ok(entry) => match &*entry {
            Some(result) => result.clone().map_err(MemoError::Compute),
            None => Err(MemoError::Cancelled),
        },
        // The computation was dropped before it published a result.
        Err(_) => Err(MemoError::Cancelled),
    };

    // The caller may have given up waiting already.
    response.send(result).ok();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test;
    use crate::Counted;

    use super::*;

    #[tokio::test]
    async fn test_repeated_lookup() {
        test::setup();

        let compute = Counted::new(|key: &'static str| async move { Ok::<_, ()>(key.len()) });
        let memo = MemoActor::new(compute.clone());

        assert_eq!(memo.get("foo").await, Ok(3));
        assert_eq!(memo.get("foo").await, Ok(3));
        assert_eq!(memo.get("quux").await, Ok(4));

        assert_eq!(compute.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_after_close() {
        test::setup();

        let compute = Counted::new(|key: u32| async move { Ok::<_, ()>(key) });
        let memo = MemoActor::with_config(&MemoConfig::named("closing"), compute.clone());
        let clone = memo.clone();

        assert_eq!(memo.get(1).await, Ok(1));
        assert!(!clone.is_closed());

        memo.close();
        // closing twice is harmless
        clone.close();

        assert!(clone.is_closed());
        assert_eq!(memo.get(1).await, Err(MemoError::Closed));
        assert_eq!(clone.get(2).await, Err(MemoError::Closed));
        assert_eq!(compute.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_answers_accepted_requests() {
        test::setup();

        let compute = Counted::new(|key: u32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ()>(key)
        });
        let memo = MemoActor::new(compute.clone());

        let pending = tokio::spawn({
            let memo = memo.clone();
            async move { memo.get(5).await }
        });
        // let the worker accept the request
        tokio::time::sleep(Duration::from_millis(10)).await;

        memo.close();

        assert_eq!(pending.await.unwrap(), Ok(5));
        assert_eq!(compute.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_when_all_handles_dropped() {
        test::setup();

        // The worker owns the computation, so it is released once the worker exits.
        let token = Arc::new(());
        let released = Arc::downgrade(&token);
        let compute = move |key: u32| {
            let _token = &token;
            async move { Ok::<_, ()>(key) }
        };

        let memo = MemoActor::new(compute);
        let clone = memo.clone();
        assert_eq!(clone.get(3).await, Ok(3));
        assert!(released.upgrade().is_some());

        drop(memo);
        // a single remaining handle keeps the worker alive
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(released.upgrade().is_some());
        assert_eq!(clone.get(3).await, Ok(3));

        drop(clone);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(released.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_debug_output() {
        let memo = MemoActor::with_config(
            &MemoConfig::named("debug"),
            |key: u32| async move { Ok::<_, ()>(key) },
        );
        assert_eq!(
            format!("{memo:?}"),
            r#"MemoActor { name: "debug", closed: false }"#
        );

        memo.close();
        assert_eq!(
            format!("{memo:?}"),
            r#"MemoActor { name: "debug", closed: true }"#
        );
    }

    #[tokio::test]
    async fn test_panicking_computation_is_cancelled() {
        test::setup();

        let compute = Counted::new(|key: u32| async move {
            if key == 0 {
                panic!("cannot compute zero");
            }
            Ok::<_, ()>(key)
        });
        let memo = MemoActor::new(compute.clone());

        assert_eq!(memo.get(0).await, Err(MemoError::Cancelled));
        assert_eq!(memo.get(0).await, Err(MemoError::Cancelled));
        assert_eq!(memo.get(1).await, Ok(1));

        assert_eq!(compute.calls(), 2);
    }
}
