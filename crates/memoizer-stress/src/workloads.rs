use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::ValueEnum;
use memoizer::{Counted, Memo, MemoActor, MemoConfig, Memoizer};
use serde::Deserialize;

use crate::config::Config;
use crate::fetch::{FetchError, Fetcher, HttpFetcher, SyntheticFetcher};

/// A memoizer of either design, shared between all tasks driving it.
pub type SharedMemoizer = Arc<dyn Memoizer<String, Value = Bytes, Error = FetchError>>;

/// Which memoizer implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Design {
    /// A map guarded by a lock, see [`Memo`].
    #[default]
    Lock,
    /// A map owned by a worker task, see [`MemoActor`].
    Actor,
}

impl Design {
    pub fn build(self, config: &MemoConfig, fetcher: Counted<Fetcher>) -> SharedMemoizer {
        match self {
            Design::Lock => Arc::new(Memo::with_config(config, fetcher)),
            Design::Actor => Arc::new(MemoActor::with_config(config, fetcher)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse workloads YAML")
    }
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    #[serde(default)]
    pub design: Design,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// Offline computations over `keys` distinct keys.
    Synthetic {
        keys: usize,
        #[serde(with = "humantime_serde")]
        delay: Duration,
        #[serde(default)]
        fail_every: Option<usize>,
    },
    /// HTTP fetches of the given URLs.
    Fetch { urls: Vec<String> },
}

/// A workload ready to be driven: a fresh memoizer and the keys to request from it.
pub struct PreparedWorkload {
    pub concurrency: usize,
    pub memo: SharedMemoizer,
    pub fetcher: Counted<Fetcher>,
    keys: Arc<[String]>,
    next: AtomicUsize,
}

impl PreparedWorkload {
    /// The number of distinct keys of this workload.
    pub fn distinct_keys(&self) -> usize {
        self.keys.len()
    }

    /// Returns the key to request next, cycling through all keys.
    pub fn next_key(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.keys[n % self.keys.len()].clone()
    }

    /// The number of keys handed out so far.
    pub fn requested(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}

/// Builds the fetcher, keys and memoizer for a single workload.
pub fn prepare_workload(
    index: usize,
    workload: Workload,
    config: &Config,
) -> Result<PreparedWorkload> {
    let (fetcher, keys): (Fetcher, Vec<String>) = match workload.payload {
        Payload::Synthetic {
            keys,
            delay,
            fail_every,
        } => {
            let keys = (0..keys).map(|i| format!("synthetic://{index}/{i}")).collect();
            (
                Fetcher::Synthetic(SyntheticFetcher::new(delay, fail_every)),
                keys,
            )
        }
        Payload::Fetch { urls } => {
            let fetcher = HttpFetcher::new(&config.fetch).context("failed to create HTTP client")?;
            (Fetcher::Http(fetcher), urls)
        }
    };

    // repeated keys are requested in turn, but only computed once
    let mut seen = HashSet::new();
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect();

    if keys.is_empty() {
        anyhow::bail!("workload {index} has no keys");
    }
    if workload.concurrency == 0 {
        anyhow::bail!("workload {index} has a concurrency of 0");
    }

    let memo_config = MemoConfig {
        name: format!("{}-{index}", config.memo.name),
        ..config.memo.clone()
    };
    let fetcher = Counted::new(fetcher);
    let memo = workload.design.build(&memo_config, fetcher.clone());

    Ok(PreparedWorkload {
        concurrency: workload.concurrency,
        memo,
        fetcher,
        keys: keys.into(),
        next: AtomicUsize::new(0),
    })
}
