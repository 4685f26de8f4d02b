use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::prelude::*;

use crate::compositor::TileTally;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MosaicError, MosaicResult};

/// One frame to composite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameJob {
    pub index: FrameIndex,
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Success,
    Failure(String),
    /// Never started because the run was cancelled.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameResult {
    pub index: FrameIndex,
    pub path: PathBuf,
    pub outcome: FrameOutcome,
    pub tiles: TileTally,
}

impl FrameResult {
    pub fn is_success(&self) -> bool {
        self.outcome == FrameOutcome::Success
    }

    pub fn tile_match_rate(&self) -> f64 {
        self.tiles.match_rate()
    }
}

/// Aggregate of every frame result of one pool run, in submission order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub results: Vec<FrameResult>,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl RunSummary {
    fn from_results(results: Vec<FrameResult>) -> Self {
        let mut summary = Self {
            total: results.len() as u64,
            ..Self::default()
        };
        for r in &results {
            match r.outcome {
                FrameOutcome::Success => summary.succeeded += 1,
                FrameOutcome::Failure(_) => summary.failed += 1,
                FrameOutcome::Abandoned => summary.abandoned += 1,
            }
        }
        summary.results = results;
        summary
    }

    /// Share of frames that did not succeed.
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.failed + self.abandoned) as f64 / self.total as f64
        }
    }

    pub fn is_degraded(&self, warn_ratio: f64) -> bool {
        self.total > 0 && self.failure_ratio() > warn_ratio
    }

    /// Mean tile match rate over successful frames.
    pub fn mean_match_rate(&self) -> f64 {
        let rates: Vec<f64> = self
            .results
            .iter()
            .filter(|r| r.is_success())
            .map(FrameResult::tile_match_rate)
            .collect();
        if rates.is_empty() {
            0.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        }
    }
}

/// Handle for abandoning the frames a pool has not started yet.
///
/// Cancellation is sticky: every later run on a pool holding this token abandons all of its jobs
/// until [`CancelToken::reset`] is called.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous [`CancelToken::cancel`] so the pool accepts work again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded pool of frame workers.
///
/// At most `workers` jobs run at once; each job is attempted exactly once. A failing or panicking
/// job is recorded and never cancels its siblings. [`FramePool::run`] returns only after every
/// job has finished or been abandoned; dropping the pool releases its threads.
pub struct FramePool {
    pool: rayon::ThreadPool,
    workers: usize,
    cancel: CancelToken,
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("workers", &self.workers)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl FramePool {
    pub fn new(workers: usize) -> MosaicResult<Self> {
        Self::with_cancel(workers, CancelToken::default())
    }

    /// Pool observing a caller-owned token, so a run can be cancelled from outside.
    pub fn with_cancel(workers: usize, cancel: CancelToken) -> MosaicResult<Self> {
        Ok(Self {
            pool: build_thread_pool(workers)?,
            workers,
            cancel,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Token that abandons not-yet-started jobs of this pool's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `op` on the pool's threads, for work that should share the same concurrency bound.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Execute `job_fn` for every job and collect one result per job, in submission order.
    pub fn run<F>(&self, jobs: &[FrameJob], job_fn: F) -> RunSummary
    where
        F: Fn(&FrameJob) -> MosaicResult<TileTally> + Sync,
    {
        let total = jobs.len();
        let done = AtomicU64::new(0);
        tracing::info!(frames = total, workers = self.workers, "dispatching frames");

        let results: Vec<FrameResult> = self.pool.install(|| {
            jobs.par_iter()
                .with_max_len(1)
                .map(|job| {
                    let result = self.run_one(job, &job_fn);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(frame = job.index.0, done = n, total, "frame finished");
                    result
                })
                .collect()
        });

        let summary = RunSummary::from_results(results);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "frame pool drained"
        );
        summary
    }

    /// Release the worker threads.
    pub fn shutdown(self) {
        tracing::debug!(workers = self.workers, "shutting down frame pool");
        drop(self.pool);
    }

    fn run_one<F>(&self, job: &FrameJob, job_fn: &F) -> FrameResult
    where
        F: Fn(&FrameJob) -> MosaicResult<TileTally> + Sync,
    {
        let mut result = FrameResult {
            index: job.index,
            path: job.input.clone(),
            outcome: FrameOutcome::Abandoned,
            tiles: TileTally::default(),
        };
        if self.cancel.is_cancelled() {
            return result;
        }

        match catch_unwind(AssertUnwindSafe(|| job_fn(job))) {
            Ok(Ok(tiles)) => {
                result.outcome = FrameOutcome::Success;
                result.tiles = tiles;
            }
            Ok(Err(e)) => {
                tracing::warn!(frame = job.index.0, error = %e, "frame failed");
                result.outcome = FrameOutcome::Failure(e.to_string());
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::warn!(frame = job.index.0, panic = %msg, "frame job panicked");
                result.outcome = FrameOutcome::Failure(format!("frame job panicked: {msg}"));
            }
        }
        result
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn build_thread_pool(threads: usize) -> MosaicResult<rayon::ThreadPool> {
    if threads == 0 {
        return Err(MosaicError::validation("frame pool workers must be >= 1"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("lumosaic-worker-{i}"))
        .build()
        .map_err(|e| MosaicError::validation(format!("failed to build rayon thread pool: {e}")))
}
