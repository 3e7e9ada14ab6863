//! # Duplicate suppressing memoization
//!
//! This crate wraps a possibly slow, possibly failing computation ([`Compute`]) and remembers its
//! result per key. For a given key, the computation runs at most once, no matter how many callers
//! request that key concurrently. Callers requesting different keys never wait on each other.
//!
//! ## Implementations
//!
//! Two implementations with the same external behavior are provided, both implementing the
//! [`Memoizer`] trait:
//!
//! - [`Memo`] keeps all entries in a map guarded by a lock, which is only held to look up or
//!   insert an entry, never during a computation. Each entry is a shared channel which is
//!   completed exactly once.
//! - [`MemoActor`] keeps all entries in a map exclusively owned by a worker task. Callers send
//!   requests to the worker via a channel. It has to be [closed](MemoActor::close) explicitly,
//!   or stops once all of its handles are dropped.
//!
//! ## Failures
//!
//! A failed computation is remembered exactly like a successful one, and all callers of that key
//! observe the same [`MemoError::Compute`]. There are no retries, no eviction and no expiration.
//! Entries live as long as the memoizer does. Computations are not cancelled or timed out either:
//! if one never finishes, all callers of that key wait forever. Use a computation with a
//! built-in timeout if that is a concern.
//!
//! ## Metrics
//!
//! Each of these is tagged with a `memo` field that corresponds to the configured
//! [`MemoConfig::name`]:
//!
//! - `memo.access`: All accesses.
//! - `memo.channel.hit`: Accesses served by an existing entry, finished or in progress.
//! - `memo.channel.miss`: Accesses creating a new entry.
//! - `memo.computation`: Actual computations being run.
//! - `memo.computation.duration`: The time each computation took.

#[macro_use]
pub mod metrics;

mod actor;
mod compute;
mod config;
mod error;
mod memo;


use std::hash::Hash;

use async_trait::async_trait;

pub use actor::MemoActor;
pub use compute::{Compute, Counted};
pub use config::MemoConfig;
pub use error::{MemoError, MemoResult};
pub use memo::Memo;

/// Common interface of all memoizer implementations.
#[async_trait]
pub trait Memoizer<K: Send + 'static>: Send + Sync {
    type Value;
    type Error;

    /// Returns the value for `key`, computing it on first access.
    async fn get(&self, key: K) -> MemoResult<Self::Value, Self::Error>;
}

#[async_trait]
impl<K, C> Memoizer<K> for Memo<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Compute<K>,
{
    type Value = C::Value;
    type Error = C::Error;

    async fn get(&self, key: K) -> MemoResult<C::Value, C::Error> {
        Memo::get(self, key).await
    }
}

#[async_trait]
impl<K, C> Memoizer<K> for MemoActor<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Compute<K>,
{
    type Value = C::Value;
    type Error = C::Error;

    async fn get(&self, key: K) -> MemoResult<C::Value, C::Error> {
        MemoActor::get(self, key).await
    }
}
