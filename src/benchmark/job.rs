//! The unit of work handed to the worker pool, and what comes back.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use thiserror::Error;

use crate::core::{config::Controller, format_duration};

/// Process-wide sequence backing [`JobId`] uniqueness
static NEXT_JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identifier of a job, unique for the lifetime of the process.
///
/// It is handed to the simulator, which appends it to player names, so it
/// has to stay a short single command-line token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// `g<index>_<seq><nonce>`: the sequence makes it unique inside this
    /// process, the random nonce keeps separate runs from colliding in logs.
    pub fn generate(index: usize) -> Self {
        let seq = NEXT_JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let nonce: u16 = rand::random();
        JobId(format!("g{index}_{seq:x}{nonce:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One simulator invocation: who sits where, and how many games to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Deck in seat 1
    pub deck_a: String,
    /// Deck in seat 2
    pub deck_b: String,
    pub controllers: [Controller; 2],
    pub id: JobId,
    /// Human readable, only for logs
    pub label: String,
    pub games: u32,
}

impl JobSpec {
    pub fn new(
        configuration: &str,
        index: usize,
        decks: [&str; 2],
        controllers: [Controller; 2],
        games: u32,
    ) -> Self {
        let id = JobId::generate(index);
        let label = format!("{configuration}_game_{index}_{id}");

        Self {
            deck_a: decks[0].to_string(),
            deck_b: decks[1].to_string(),
            controllers,
            id,
            label,
            games,
        }
    }

    /// Comma separated controller list for the simulator's `-c` flag
    pub fn controller_list(&self) -> String {
        self.controllers
            .iter()
            .map(Controller::as_arg)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Why a job produced no output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("simulator exited with status {}", code.map_or("<signal>".to_string(), |c| c.to_string()))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("simulator timed out after {}", format_duration(*after))]
    Timeout { after: Duration },

    #[error("failed to run simulator: {reason}")]
    SpawnError { reason: String },

    #[error("timed out while retrieving the result")]
    ResultRetrievalTimeout,

    #[error("cancelled before the result was delivered")]
    Cancelled,
}

impl JobFailure {
    pub fn tag(&self) -> &'static str {
        match self {
            JobFailure::NonZeroExit { .. } => "process-non-zero-exit",
            JobFailure::Timeout { .. } => "timeout",
            JobFailure::SpawnError { .. } => "spawn-error",
            JobFailure::ResultRetrievalTimeout => "result-retrieval-timeout",
            JobFailure::Cancelled => "cancelled",
        }
    }
}

/// Produced exactly once per [`JobSpec`]: captured stdout, or a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    pub outcome: Result<String, JobFailure>,
    pub elapsed: Duration,
    /// Process id of the simulator, when one was started
    pub pid: Option<u32>,
}

impl JobResult {
    pub fn success(job_id: JobId, stdout: String, elapsed: Duration) -> Self {
        Self {
            job_id,
            outcome: Ok(stdout),
            elapsed,
            pid: None,
        }
    }

    pub fn failure(job_id: JobId, failure: JobFailure, elapsed: Duration) -> Self {
        Self {
            job_id,
            outcome: Err(failure),
            elapsed,
            pid: None,
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn failure_reason(&self) -> Option<&JobFailure> {
        self.outcome.as_ref().err()
    }
}
