//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humantime::parse_duration;

use crate::config::Config;
use crate::demo;
use crate::fetch::{Fetcher, HttpFetcher, SyntheticFetcher};
use crate::logging;
use crate::stresstest;
use crate::workloads::{Design, WorkloadsConfig};

/// Memoizer commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a list of URLs twice, first one after another, then all at once.
    Demo {
        /// The URLs to fetch. Defaults to a few well known sites.
        urls: Vec<String>,

        /// The memoizer implementation to use.
        #[arg(long, value_enum, default_value = "lock")]
        design: Design,

        /// Do not touch the network, and use the URL itself as the response body.
        #[arg(long)]
        offline: bool,

        /// The time each offline fetch takes.
        #[arg(long, value_parser = parse_duration, default_value = "100ms")]
        delay: Duration,
    },

    /// Drive memoizers with concurrent workloads for a fixed time.
    Stress {
        /// Path to the workload definition file.
        #[arg(long, short, value_name = "FILE")]
        workloads: PathBuf,

        /// Duration of the stresstest.
        #[arg(long, short, value_parser = parse_duration, default_value = "10s")]
        duration: Duration,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: Nothing has spawned a thread yet, neither the Sentry transport nor the runtime.
    unsafe { logging::init_logging(&config) };

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        traces_sample_rate: 1.0,
        ..Default::default()
    });

    if let Some(ref statsd) = config.metrics.statsd {
        memoizer::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    match cli.command {
        Command::Demo {
            urls,
            design,
            offline,
            delay,
        } => {
            let fetcher = if offline {
                Fetcher::Synthetic(SyntheticFetcher::new(delay, None))
            } else {
                Fetcher::Http(
                    HttpFetcher::new(&config.fetch).context("failed to create HTTP client")?,
                )
            };
            let urls = demo::demo_urls(urls);
            runtime.block_on(demo::run_demo(&config.memo, design, fetcher, &urls));
        }
        Command::Stress {
            workloads,
            duration,
        } => {
            let workloads_file =
                std::fs::File::open(workloads).context("failed to open workloads file")?;
            let workloads = WorkloadsConfig::from_reader(workloads_file)?;
            runtime.block_on(stresstest::perform_stresstest(&config, workloads, duration))?;
        }
    }

    Ok(())
}
