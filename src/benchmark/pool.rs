//! Bounded concurrent execution of jobs with per-job and whole-batch deadlines.
//!
//! Results are delivered in completion order, each paired with the
//! [`JobSpec`] it answers. A failed job never stops the batch; only a
//! panicking worker is reported as an error.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc, watch},
    task::JoinHandle,
};

use crate::benchmark::{
    job::{JobFailure, JobId, JobResult, JobSpec},
    process::{CancelSignal, cancelled, never_cancelled},
};

/// Runs a single job. Implemented by [`ProcessRunner`](super::process::ProcessRunner).
///
/// Implementations must honour `timeout` and `cancel`, and must not leave
/// anything running once the returned future resolves.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        job: &JobSpec,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> impl Future<Output = JobResult> + Send;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub job_timeout: Duration,
    pub batch_timeout: Duration,
    /// Allowed delay between a worker announcing a result and handing it over
    pub retrieval_timeout: Duration,
    /// How long cancelled workers get to clean up before they are aborted
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            job_timeout: Duration::from_secs(300),
            batch_timeout: Duration::from_secs(600),
            retrieval_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("worker for job {job_id} panicked ({completed} completed, {abandoned} abandoned)")]
    WorkerPanicked {
        job_id: JobId,
        completed: usize,
        abandoned: usize,
    },
}

/// Everything a batch produced, in completion order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(JobSpec, JobResult)>,
    pub batch_timed_out: bool,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn cancelled(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| r.failure_reason() == Some(&JobFailure::Cancelled))
            .count()
    }
}

pub struct WorkerPool<E: JobExecutor> {
    executor: Arc<E>,
    config: PoolConfig,
}

impl<E: JobExecutor> WorkerPool<E> {
    pub fn new(executor: E, config: PoolConfig) -> Result<Self, PoolError> {
        if config.max_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        Ok(Self {
            executor: Arc::new(executor),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn run_all(&self, jobs: Vec<JobSpec>) -> Result<BatchReport, PoolError> {
        self.run_all_with(jobs, never_cancelled(), |_, _| {}).await
    }

    /// Run every job, calling `on_result` as each one is delivered.
    ///
    /// `shutdown` firing has the same effect as the batch timeout elapsing:
    /// undelivered jobs are cancelled, their workers are stopped, and the
    /// report is returned with `interrupted` set.
    pub async fn run_all_with<F>(
        &self,
        jobs: Vec<JobSpec>,
        mut shutdown: CancelSignal,
        mut on_result: F,
    ) -> Result<BatchReport, PoolError>
    where
        F: FnMut(&JobSpec, &JobResult),
    {
        let start = Instant::now();
        let deadline = deadline_after(self.config.batch_timeout);
        let total = jobs.len();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<JobId>();
        let mut pending = self.spawn_workers(jobs, cancel_rx, done_tx);

        let mut report = BatchReport::default();
        let mut stragglers: Vec<(JobSpec, JoinHandle<JobResult>)> = Vec::new();
        let mut panicked: Option<JobId> = None;

        while !pending.is_empty() {
            let job_id = tokio::select! {
                received = tokio::time::timeout_at(deadline, done_rx.recv()) => match received {
                    Ok(Some(job_id)) => job_id,
                    // Every worker is gone, the remaining ones died without reporting
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(
                            "Batch timeout of {:.0}s reached with {} job(s) outstanding",
                            self.config.batch_timeout.as_secs_f64(),
                            pending.len()
                        );
                        report.batch_timed_out = true;
                        break;
                    }
                },
                _ = cancelled(&mut shutdown) => {
                    tracing::info!("Shutdown requested, cancelling {} job(s)", pending.len());
                    report.interrupted = true;
                    break;
                }
            };

            let Some((spec, mut handle)) = pending.remove(&job_id) else {
                continue;
            };

            // A worker announces its job only once the result exists, so this
            // wait is a handover. It still never outlives the batch.
            let retrieval_deadline = deadline.min(deadline_after(self.config.retrieval_timeout));
            let result =
                match tokio::time::timeout_at(retrieval_deadline, &mut handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        tracing::error!(job_id = %spec.id, "Worker failed: {e}");
                        if e.is_panic() {
                            panicked.get_or_insert_with(|| spec.id.clone());
                        }
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!(job_id = %spec.id, "Timed out retrieving result");
                        let result = JobResult::failure(
                            spec.id.clone(),
                            JobFailure::ResultRetrievalTimeout,
                            start.elapsed(),
                        );
                        stragglers.push((spec.clone(), handle));
                        result
                    }
                };

            if let Err(failure) = &result.outcome {
                tracing::warn!(job_id = %spec.id, "{} failed: {failure}", spec.label);
            }
            on_result(&spec, &result);
            report.results.push((spec, result));
        }

        // Stop whatever is still running and wait for it to clean up
        if !pending.is_empty() || !stragglers.is_empty() {
            let _ = cancel_tx.send(true);
        }
        let shutdown_deadline = deadline_after(self.config.shutdown_timeout);

        for (spec, handle) in stragglers {
            drain_worker(&spec, handle, shutdown_deadline, &mut panicked).await;
        }

        let mut abandoned: Vec<_> = pending.into_values().collect();
        abandoned.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        for (spec, handle) in abandoned {
            let pid = drain_worker(&spec, handle, shutdown_deadline, &mut panicked).await;
            let result = JobResult::failure(spec.id.clone(), JobFailure::Cancelled, start.elapsed())
                .with_pid(pid);
            on_result(&spec, &result);
            report.results.push((spec, result));
        }

        report.elapsed = start.elapsed();

        if let Some(job_id) = panicked {
            let completed = report.succeeded();
            return Err(PoolError::WorkerPanicked {
                job_id,
                completed,
                abandoned: total - completed,
            });
        }

        tracing::info!(
            "Batch finished in {:.1}s: {} succeeded, {} failed ({} cancelled)",
            report.elapsed.as_secs_f64(),
            report.succeeded(),
            report.failed(),
            report.cancelled()
        );

        Ok(report)
    }

    fn spawn_workers(
        &self,
        jobs: Vec<JobSpec>,
        cancel: CancelSignal,
        done: mpsc::UnboundedSender<JobId>,
    ) -> HashMap<JobId, (JobSpec, JoinHandle<JobResult>)> {
        // The only synchronisation the workers share
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut pending = HashMap::with_capacity(jobs.len());

        for job in jobs {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let mut cancel = cancel.clone();
            let done = done.clone();
            let timeout = self.config.job_timeout;
            let spec = job.clone();

            let handle = tokio::spawn(async move {
                let queued = Instant::now();
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(permit) => {
                        let result = executor.execute(&spec, timeout, cancel).await;
                        drop(permit);
                        result
                    }
                    None => JobResult::failure(
                        spec.id.clone(),
                        JobFailure::Cancelled,
                        queued.elapsed(),
                    ),
                };

                let _ = done.send(spec.id.clone());
                result
            });

            if pending.insert(job.id.clone(), (job, handle)).is_some() {
                tracing::error!("Duplicate job id submitted to the worker pool");
            }
        }

        pending
    }
}

/// `now + duration`, clamped to roughly thirty years for huge durations
fn deadline_after(duration: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Wait for a cancelled worker to finish, aborting it past `deadline`.
/// Returns the process id it reports, if any.
async fn drain_worker(
    spec: &JobSpec,
    mut handle: JoinHandle<JobResult>,
    deadline: tokio::time::Instant,
    panicked: &mut Option<JobId>,
) -> Option<u32> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(late)) => late.pid,
        Ok(Err(e)) => {
            if e.is_panic() {
                tracing::error!(job_id = %spec.id, "Worker panicked: {e}");
                panicked.get_or_insert_with(|| spec.id.clone());
            }
            None
        }
        Err(_) => {
            // Dropping the job's future kills its process
            tracing::error!(job_id = %spec.id, "Worker did not stop in time, aborting it");
            handle.abort();
            let _ = handle.await;
            None
        }
    }
}
