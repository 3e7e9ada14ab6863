use std::time::Duration;

use bytes::Bytes;
use memoizer::{Counted, MemoConfig, MemoResult};
use tokio::time::Instant;

use crate::fetch::{FetchError, Fetcher};
use crate::workloads::Design;

/// The URLs requested if none are given on the command line.
pub const DEFAULT_URLS: [&str; 4] = [
    "https://golang.org",
    "https://godoc.org",
    "https://play.golang.org",
    "http://gopl.io",
];

/// The outcome of requesting every URL once, either one after another or all at once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub requests: usize,
    pub failures: usize,
    pub computations: usize,
    pub elapsed: Duration,
}

/// Returns the URLs to request, listing each of them twice.
pub fn demo_urls(urls: Vec<String>) -> Vec<String> {
    let urls = if urls.is_empty() {
        DEFAULT_URLS.iter().map(|url| url.to_string()).collect()
    } else {
        urls
    };
    urls.iter().chain(urls.iter()).cloned().collect()
}

/// Runs the demo: first requests all `urls` sequentially, then concurrently.
///
/// Each phase gets a fresh memoizer, so the second request of every URL is served from memory
/// in the sequential phase, and waits for the in-flight computation in the concurrent one.
pub async fn run_demo(
    config: &MemoConfig,
    design: Design,
    fetcher: Fetcher,
    urls: &[String],
) -> Vec<PhaseReport> {
    let sequential = sequential_phase(config, design, fetcher.clone(), urls).await;
    let concurrent = concurrent_phase(config, design, fetcher, urls).await;

    let reports = vec![sequential, concurrent];
    for report in &reports {
        println!(
            "{}: {} requests, {} failed, {} computations in {:.2?}",
            report.phase, report.requests, report.failures, report.computations, report.elapsed,
        );
    }
    reports
}

async fn sequential_phase(
    config: &MemoConfig,
    design: Design,
    fetcher: Fetcher,
    urls: &[String],
) -> PhaseReport {
    let fetcher = Counted::new(fetcher);
    let memo_config = MemoConfig {
        name: format!("{}-sequential", config.name),
        ..config.clone()
    };
    let memo = design.build(&memo_config, fetcher.clone());

    let phase_start = Instant::now();
    let mut failures = 0;
    for url in urls {
        let start = Instant::now();
        let result = memo.get(url.clone()).await;
        if !print_response(url, start.elapsed(), &result) {
            failures += 1;
        }
    }

    PhaseReport {
        phase: "sequential",
        requests: urls.len(),
        failures,
        computations: fetcher.calls(),
        elapsed: phase_start.elapsed(),
    }
}

async fn concurrent_phase(
    config: &MemoConfig,
    design: Design,
    fetcher: Fetcher,
    urls: &[String],
) -> PhaseReport {
    let fetcher = Counted::new(fetcher);
    let memo_config = MemoConfig {
        name: format!("{}-concurrent", config.name),
        ..config.clone()
    };
    let memo = design.build(&memo_config, fetcher.clone());

    let phase_start = Instant::now();
    let requests = urls.iter().cloned().map(|url| {
        let memo = memo.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let result = memo.get(url.clone()).await;
            print_response(&url, start.elapsed(), &result)
        })
    });

    let failures = futures::future::join_all(requests)
        .await
        .into_iter()
        .filter(|succeeded| !matches!(succeeded, Ok(true)))
        .count();

    PhaseReport {
        phase: "concurrent",
        requests: urls.len(),
        failures,
        computations: fetcher.calls(),
        elapsed: phase_start.elapsed(),
    }
}

/// Prints a single response, returning whether it was successful.
fn print_response(url: &str, elapsed: Duration, result: &MemoResult<Bytes, FetchError>) -> bool {
    match result {
        Ok(body) => {
            println!("{url}, {elapsed:.2?}, {} bytes", body.len());
            true
        }
        Err(error) => {
            tracing::error!(url, error = %error, "request failed");
            false
        }
    }
}
