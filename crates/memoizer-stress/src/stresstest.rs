use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::Config;
use crate::workloads::{prepare_workload, PreparedWorkload, WorkloadsConfig};

/// The measurements of a single workload.
pub struct WorkloadReport {
    pub concurrency: usize,
    pub durations: DDSketch,
    pub failures: usize,
    pub computations: usize,
    pub distinct_keys: usize,
}

impl fmt::Debug for WorkloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadReport")
            .field("concurrency", &self.concurrency)
            .field("operations", &self.durations.count())
            .field("failures", &self.failures)
            .field("computations", &self.computations)
            .field("distinct_keys", &self.distinct_keys)
            .finish()
    }
}

impl WorkloadReport {
    /// Whether every requested key was computed exactly once.
    pub fn is_deduplicated(&self) -> bool {
        self.computations == self.distinct_keys
    }
}

pub async fn perform_stresstest(
    config: &Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<Vec<WorkloadReport>> {
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| prepare_workload(i, workload, config).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    // run the workloads concurrently
    let deadline = Instant::now() + duration;
    let tasks = workloads
        .into_iter()
        .map(|workload| tokio::spawn(run_workload(workload, deadline)));

    let mut reports = Vec::new();
    for (i, task) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        let report = task?;
        print_report(i, &report, duration);
        reports.push(report);
    }

    let mismatched: Vec<_> = reports
        .iter()
        .enumerate()
        .filter(|(_, report)| !report.is_deduplicated())
        .map(|(i, _)| i)
        .collect();
    if !mismatched.is_empty() {
        anyhow::bail!("duplicate computations in workloads {mismatched:?}");
    }

    Ok(reports)
}

async fn run_workload(workload: Arc<PreparedWorkload>, deadline: Instant) -> WorkloadReport {
    let concurrency = workload.concurrency;
    let task_durations = Arc::new(Mutex::new(DDSketch::default()));
    let failures = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        if deadline.elapsed() > Duration::ZERO {
            break;
        }
        tokio::select! {
            permit = semaphore.clone().acquire_owned() => {
                let Ok(permit) = permit else {
                    break;
                };
                let workload = Arc::clone(&workload);
                let task_durations = Arc::clone(&task_durations);
                let failures = Arc::clone(&failures);
                let task_start = Instant::now();

                let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                let ctx = sentry::TransactionContext::new("stresstest", "memo.get");
                let transaction = hub.start_transaction(ctx);

                let future = async move {
                    let key = workload.next_key();
                    if let Err(error) = workload.memo.get(key.clone()).await {
                        tracing::debug!(key = %key, error = %error, "lookup failed");
                        failures.fetch_add(1, Ordering::Relaxed);
                    }

                    transaction.finish();

                    task_durations.lock().add(task_start.elapsed().as_secs_f64());

                    drop(permit);
                };

                tokio::spawn(future.bind_hub(hub));
            }
            _ = &mut sleep => {
                break;
            }
        }
    }

    // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
    let _permits = semaphore.acquire_many(concurrency as u32).await;

    let durations = std::mem::take(&mut *task_durations.lock());

    WorkloadReport {
        concurrency,
        durations,
        failures: failures.load(Ordering::Relaxed),
        computations: workload.fetcher.calls(),
        distinct_keys: workload.requested().min(workload.distinct_keys()),
    }
}

fn print_report(i: usize, report: &WorkloadReport, duration: Duration) {
    let WorkloadReport {
        concurrency,
        durations,
        failures,
        computations,
        distinct_keys,
    } = report;

    let ops = durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!(
        "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {failures} failed"
    );

    if ops > 0 {
        let quantile = |q| {
            let secs = durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    println!("  {computations} computations for {distinct_keys} distinct keys");
}
