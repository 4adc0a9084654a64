//! Batch mode: many independent jobs on a bounded worker pool.
//!
//! A batch file holds one job per line:
//!
//! ```text
//! # comment
//! stage1.arc --add 1 --step 0x100
//! "My Model.bmd" --random --start 0x400 -o "My Model.corrupt.bmd"
//! ```
//!
//! Words are split on whitespace; double quotes group words.  Each job runs
//! to completion or failure; one failing job never stops the others.
//!
//! With the `parallel` feature (default) jobs run on a Rayon pool sized to the
//! machine's available parallelism.  Without it they run sequentially.

use std::num::NonZeroUsize;
use std::thread;

use tracing::{info, warn};

use crate::job::{CorruptionJob, JobError, JobReport};

/// Pool size when available parallelism cannot be detected.
pub const DEFAULT_WORKERS: usize = 4;

pub fn worker_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(DEFAULT_WORKERS)
}

// ── Batch file parsing ───────────────────────────────────────────────────────

/// One non-empty, non-comment line of a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLine {
    /// 1-based line number, for error messages.
    pub line:  usize,
    pub words: Vec<String>,
}

/// Split a line into words, honouring double quotes.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    words.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        words.push(current);
    }
    words
}

pub fn parse_batch(text: &str) -> Vec<BatchLine> {
    text.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            Some(BatchLine { line: i + 1, words: split_words(trimmed) })
        })
        .collect()
}

// ── Execution ────────────────────────────────────────────────────────────────

/// Run every job and return the outcomes in input order.
pub fn run_all(jobs: &[CorruptionJob]) -> Vec<Result<JobReport, JobError>> {
    let outcomes = run_pool(jobs, worker_count());
    let failed = outcomes.iter().filter(|r| r.is_err()).count();
    info!(jobs = jobs.len(), failed, "batch finished");
    outcomes
}

#[cfg(feature = "parallel")]
fn run_pool(jobs: &[CorruptionJob], workers: usize) -> Vec<Result<JobReport, JobError>> {
    use rayon::prelude::*;

    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| jobs.par_iter().map(run_one).collect()),
        Err(e) => {
            warn!(error = %e, "worker pool unavailable, running sequentially");
            jobs.iter().map(run_one).collect()
        }
    }
}

#[cfg(not(feature = "parallel"))]
fn run_pool(jobs: &[CorruptionJob], _workers: usize) -> Vec<Result<JobReport, JobError>> {
    jobs.iter().map(run_one).collect()
}

fn run_one(job: &CorruptionJob) -> Result<JobReport, JobError> {
    let outcome = job.run();
    if let Err(e) = &outcome {
        warn!(input = %job.input_path().display(), error = %e, "job failed");
    }
    outcome
}
