//! Running one simulator process per job, and making sure it is gone afterwards.
//!
//! A process, once started, either exits on its own and is reaped, or is
//! terminated and reaped, before [`ProcessRunner::run`] returns. The
//! [`ProcessGuard`] covers the remaining path, the future being dropped.

use std::{
    io,
    process::ExitStatus,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    sync::watch,
    task::JoinHandle,
};

use crate::{
    benchmark::{
        job::{JobFailure, JobResult, JobSpec},
        pool::JobExecutor,
    },
    core::SimulatorExecutor,
};

/// Flipped to `true` when a job should stop as soon as possible
pub type CancelSignal = watch::Receiver<bool>;

/// A signal that never fires
pub fn never_cancelled() -> CancelSignal {
    watch::channel(false).1
}

/// Resolves once cancellation was requested. A closed channel never resolves.
pub async fn cancelled(signal: &mut CancelSignal) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    simulator: Arc<SimulatorExecutor>,
    grace_period: Duration,
    retrieval_timeout: Duration,
}

enum Exit {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    pub fn new(simulator: SimulatorExecutor) -> Self {
        Self {
            simulator: Arc::new(simulator),
            grace_period: DEFAULT_GRACE_PERIOD,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    /// Time between the polite termination request and the forced kill
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// How long to wait for captured output once the process has exited
    pub fn with_retrieval_timeout(mut self, retrieval_timeout: Duration) -> Self {
        self.retrieval_timeout = retrieval_timeout;
        self
    }

    pub fn simulator(&self) -> &SimulatorExecutor {
        &self.simulator
    }

    pub async fn run(&self, job: &JobSpec, timeout: Duration) -> JobResult {
        self.run_cancellable(job, timeout, never_cancelled()).await
    }

    /// Like [`run`](Self::run), but also stops (and reaps) the process when
    /// `cancel` fires, reporting the job as cancelled.
    pub async fn run_cancellable(
        &self,
        job: &JobSpec,
        timeout: Duration,
        mut cancel: CancelSignal,
    ) -> JobResult {
        let start = Instant::now();
        let mut cmd = self.simulator.command_for(job);

        tracing::debug!(job_id = %job.id, "Starting {}", job.label);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(job_id = %job.id, "Failed to spawn simulator: {e}");
                return JobResult::failure(
                    job.id.clone(),
                    JobFailure::SpawnError {
                        reason: e.to_string(),
                    },
                    start.elapsed(),
                );
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_stream(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_stream(err)));
        let mut guard = ProcessGuard::new(child, pid);

        let exit = tokio::select! {
            status = guard.child.wait() => Exit::Exited(status),
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancelled(&mut cancel) => Exit::Cancelled,
        };

        let failure = match exit {
            Exit::Exited(Ok(status)) => {
                guard.reaped = true;
                return self.collect(job, status, stdout, stderr, guard, start).await;
            }
            Exit::Exited(Err(e)) => {
                tracing::warn!(job_id = %job.id, "Lost track of simulator: {e}");
                JobFailure::SpawnError {
                    reason: e.to_string(),
                }
            }
            Exit::TimedOut => {
                tracing::warn!(
                    job_id = %job.id,
                    "Simulation timed out after {:.1}s, terminating",
                    timeout.as_secs_f64()
                );
                JobFailure::Timeout { after: timeout }
            }
            Exit::Cancelled => {
                tracing::info!(job_id = %job.id, "Cancelled, terminating simulator");
                JobFailure::Cancelled
            }
        };

        guard.terminate(self.grace_period).await;
        abort_readers([stdout, stderr]);

        JobResult::failure(job.id.clone(), failure, start.elapsed()).with_pid(pid)
    }

    /// Gather captured output of a process that exited by itself
    async fn collect(
        &self,
        job: &JobSpec,
        status: ExitStatus,
        stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
        stderr: Option<JoinHandle<io::Result<Vec<u8>>>>,
        guard: ProcessGuard,
        start: Instant,
    ) -> JobResult {
        let pid = guard.pid;
        let readers = [stdout, stderr];
        let drained = tokio::time::timeout(self.retrieval_timeout, async {
            let [stdout, stderr] = readers;
            (join_reader(stdout).await, join_reader(stderr).await)
        })
        .await;

        let (stdout, stderr) = match drained {
            Ok(streams) => streams,
            Err(_) => {
                // Something the simulator left behind still holds the pipes
                tracing::warn!(
                    job_id = %job.id,
                    "Simulator exited but its output did not close within {:.1}s",
                    self.retrieval_timeout.as_secs_f64()
                );
                guard.kill_group();
                return JobResult::failure(
                    job.id.clone(),
                    JobFailure::ResultRetrievalTimeout,
                    start.elapsed(),
                )
                .with_pid(pid);
            }
        };

        let stdout = match stdout {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return JobResult::failure(
                    job.id.clone(),
                    JobFailure::SpawnError {
                        reason: format!("failed to read simulator output: {e}"),
                    },
                    start.elapsed(),
                )
                .with_pid(pid);
            }
        };
        let stderr = stderr
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        if !status.success() {
            tracing::warn!(job_id = %job.id, "Simulator exited with {status}");
            tracing::debug!("Err: {stderr}");
            return JobResult::failure(
                job.id.clone(),
                JobFailure::NonZeroExit {
                    code: status.code(),
                    stderr,
                },
                start.elapsed(),
            )
            .with_pid(pid);
        }

        tracing::debug!(
            job_id = %job.id,
            "Completed in {:.2}s, {} bytes of output",
            start.elapsed().as_secs_f64(),
            stdout.len()
        );
        JobResult::success(job.id.clone(), stdout, start.elapsed()).with_pid(pid)
    }
}

impl JobExecutor for ProcessRunner {
    fn execute(
        &self,
        job: &JobSpec,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> impl Future<Output = JobResult> + Send {
        self.run_cancellable(job, timeout, cancel)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn join_reader(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match reader {
        Some(handle) => handle.await.map_err(io::Error::other)?,
        None => Ok(Vec::new()),
    }
}

fn abort_readers(readers: [Option<JoinHandle<io::Result<Vec<u8>>>>; 2]) {
    for reader in readers.into_iter().flatten() {
        reader.abort();
    }
}

/// Owns a spawned child until it has been reaped
struct ProcessGuard {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ProcessGuard {
    fn new(child: Child, pid: Option<u32>) -> Self {
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Returns once the child is reaped.
    async fn terminate(&mut self, grace: Duration) {
        if self.has_exited() {
            self.kill_group();
            return;
        }

        self.request_stop();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("Simulator stopped after termination request: {status}");
            }
            Ok(Err(e)) => tracing::warn!("Error while waiting for simulator: {e}"),
            Err(_) => {
                tracing::warn!(
                    "Simulator still running {:.1}s after termination request, killing",
                    grace.as_secs_f64()
                );
            }
        }

        // Whatever happened above, do not leave before the process is gone
        while !self.has_exited() {
            self.kill_group();
            if let Err(e) = self.child.kill().await {
                tracing::error!("Failed to kill simulator: {e}");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        // Leftover members of the group
        self.kill_group();
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => {
                self.reaped = true;
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Error while polling simulator: {e}");
                false
            }
        }
    }

    fn request_stop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if let Err(e) = signal_group(pid, libc::SIGTERM) {
                tracing::debug!("Failed to send SIGTERM to process group {pid}: {e}");
            }
            return;
        }

        // No polite way to ask, fall back to the kill
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Failed to stop simulator: {e}");
        }
    }

    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if let Err(e) = signal_group(pid, libc::SIGKILL) {
                tracing::debug!("Failed to send SIGKILL to process group {pid}: {e}");
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // The running future was dropped. Kill now, tokio reaps the orphan.
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Failed to kill abandoned simulator: {e}");
        }
    }
}

/// Send `signal` to every process in the group led by `pid`
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if ret == -1 {
        let err = io::Error::last_os_error();
        // Nobody left in the group
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
