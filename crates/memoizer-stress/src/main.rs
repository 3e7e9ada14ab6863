//! Drives the memoizers against real HTTP fetches or synthetic workloads.

mod cli;
mod config;
mod demo;
mod fetch;
mod logging;
mod stresstest;
mod workloads;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
