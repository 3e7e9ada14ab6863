use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use tracing::Instrument;

use crate::compute::Compute;
use crate::config::MemoConfig;
use crate::error::{MemoError, MemoResult};

type ComputationChannel<V, E> = Shared<oneshot::Receiver<Result<V, E>>>;
type ComputationMap<K, V, E> = Arc<Mutex<HashMap<K, ComputationChannel<V, E>>>>;

/// A memoizer sharing one map between all callers, guarded by a short-held lock.
///
/// Every key maps to a shared channel that is completed exactly once, when the computation for
/// that key finishes. The lock is only held to look up or insert a channel, never while a
/// computation is running, so requests for different keys never wait on each other.
///
/// The computation for a key is spawned as its own task on the first request, so a cancelled
/// caller does not abandon the computation for everybody else waiting on the same key. `get`
/// therefore has to be called from within a Tokio runtime.
///
/// Entries are never evicted. A computation that never finishes blocks all callers of that key.
pub struct Memo<K, C: Compute<K>> {
    name: Arc<str>,

    compute: Arc<C>,

    /// All the keys requested so far, with their (possibly still running) computation.
    entries: ComputationMap<K, C::Value, C::Error>,
}

impl<K, C: Compute<K>> Clone for Memo<K, C> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Memo {
            name: Arc::clone(&self.name),
            compute: Arc::clone(&self.compute),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, C: Compute<K>> std::fmt::Debug for Memo<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.try_lock().map(|e| e.len());
        f.debug_struct("Memo")
            .field("name", &self.name)
            .field("entries", &entries)
            .finish()
    }
}

impl<K, C> Memo<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Compute<K>,
{
    pub fn new(compute: C) -> Self {
        Self::with_config(&MemoConfig::default(), compute)
    }

    pub fn with_config(config: &MemoConfig, compute: C) -> Self {
        Memo {
            name: config.name.as_str().into(),
            compute: Arc::new(compute),
            entries: Default::default(),
        }
    }

    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of distinct keys requested so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value for `key`, computing it on first access.
    ///
    /// Concurrent requests for the same key share a single computation. Its result, success or
    /// error, is remembered and returned to all later callers without computing it again.
    pub async fn get(&self, key: K) -> MemoResult<C::Value, C::Error> {
        metric!(counter("memo.access") += 1, "memo" => self.name());

        match self.lookup_or_spawn(key).await {
            Ok(result) => result.map_err(MemoError::Compute),
            Err(oneshot::Canceled) => Err(MemoError::Cancelled),
        }
    }

    /// Looks up the channel for `key`, spawning its computation if it is requested for the first
    /// time.
    ///
    /// NOTE: This function itself is *not* `async`, because the map lock must not be held across
    /// an await point.
    fn lookup_or_spawn(&self, key: K) -> ComputationChannel<C::Value, C::Error> {
        let mut entries = self.entries.lock();
        if let Some(channel) = entries.get(&key) {
            // A concurrent or repeated lookup was deduplicated.
            metric!(counter("memo.channel.hit") += 1, "memo" => self.name());
            tracing::trace!(memo = self.name(), "deduplicated lookup");
            return channel.clone();
        }

        metric!(counter("memo.channel.miss") += 1, "memo" => self.name());
        let channel = self.create_channel(key.clone());
        entries.insert(key, channel.clone());
        channel
    }

    /// Spawns the computation for `key` and returns a shareable channel receiving its result.
    fn create_channel(&self, key: K) -> ComputationChannel<C::Value, C::Error> {
        let (sender, receiver) = oneshot::channel();

        let compute = Arc::clone(&self.compute);
        let name = Arc::clone(&self.name);
        let span = tracing::debug_span!("memoizer.compute", memo = &*name);

        let computation = async move {
            metric!(counter("memo.computation") += 1, "memo" => &name);
            tracing::debug!("starting computation");
            let start = Instant::now();

            let result = compute.compute(key).await;

            metric!(timer("memo.computation.duration") = start.elapsed(), "memo" => &name);
            tracing::debug!(ok = result.is_ok(), "finished computation");
            // Every receiver is a clone of the shared one held in the map, so this can not fail
            // unless the memoizer itself has been dropped.
            sender.send(result).ok();
        }
        .instrument(span)
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(computation);

        receiver.shared()
    }
}
