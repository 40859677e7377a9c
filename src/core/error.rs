//! Error types for forge-bench.

use std::{fmt, path::PathBuf};
use thiserror::Error;

use crate::benchmark::aggregate::BenchmarkSummary;

/// The wrapper for the error kind, with an optional hint.
#[derive(Debug)]
pub struct BenchmarkError {
    kind: BenchmarkErrorKind,
    hint: Option<String>,
}

/// All types of errors that can abort a forge-bench run.
///
/// Individual job failures are not represented here, see
/// [`JobFailure`](crate::benchmark::job::JobFailure).
#[derive(Error, Debug)]
pub enum BenchmarkErrorKind {
    #[error("Forge simulator not found. Please provide it explicitly with --simulator-path")]
    SimulatorNotFound,

    #[error("Forge simulator not found at provided path: {path}")]
    SimulatorNotFoundAtPath { path: PathBuf },

    #[error("Invalid worker count: {count}. At least one worker is required")]
    InvalidWorkerCount { count: usize },

    #[error("Invalid repetition count: {count}. At least one game per configuration is required")]
    InvalidRepetitions { count: u32 },

    #[error("Invalid controller: {input}. Valid options: ai, llm")]
    InvalidController { input: String },

    #[error("No deck given for {competitor}")]
    MissingDeck { competitor: String },

    #[error("Invalid {name}: must be at least one second")]
    InvalidTimeout { name: &'static str },

    /// `partial` holds every configuration that ran, the timed out one included
    #[error("Every job of configuration '{configuration}' was cancelled by the batch timeout ({attempted} attempted)")]
    BatchTimedOut {
        configuration: String,
        attempted: usize,
        partial: Box<BenchmarkSummary>,
    },

    #[error("Worker pool failed: {reason} ({completed} completed, {abandoned} abandoned)")]
    WorkerPool {
        reason: String,
        completed: usize,
        abandoned: usize,
    },

    #[error("Progress bar template error: {0}")]
    ProgressBar(#[from] indicatif::style::TemplateError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Template render error: {0}")]
    TemplateRender(#[from] handlebars::RenderError),

    #[error("Template error: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("JSON Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for BenchmarkErrorKind {
    fn from(error: figment::Error) -> Self {
        BenchmarkErrorKind::Config(Box::new(error))
    }
}

impl From<handlebars::TemplateError> for BenchmarkErrorKind {
    fn from(error: handlebars::TemplateError) -> Self {
        BenchmarkErrorKind::Template(Box::new(error))
    }
}

impl BenchmarkError {
    /// Attaches a hint to the error
    pub fn with_hint(mut self, hint: Option<impl Into<String>>) -> Self {
        if let Some(hint) = hint {
            self.hint = Some(hint.into());
        }
        self
    }

    pub fn kind(&self) -> &BenchmarkErrorKind {
        &self.kind
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// The results gathered before the run was aborted, if any survived
    pub fn partial_summary(&self) -> Option<&BenchmarkSummary> {
        match &self.kind {
            BenchmarkErrorKind::BatchTimedOut { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for BenchmarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint_text) = &self.hint {
            write!(f, " ({hint_text})")?;
        }

        Ok(())
    }
}

impl std::error::Error for BenchmarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Convert anything a `BenchmarkErrorKind` can be built from
impl<E> From<E> for BenchmarkError
where
    BenchmarkErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        BenchmarkError {
            kind: BenchmarkErrorKind::from(error),
            hint: None,
        }
    }
}

/// A convenient result type for forge-bench
pub type Result<T> = std::result::Result<T, BenchmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_is_appended_to_message() {
        let err = BenchmarkError::from(BenchmarkErrorKind::SimulatorNotFoundAtPath {
            path: PathBuf::from("/nope/forge.jar"),
        })
        .with_hint(Some("Build forge-gui-desktop first"));

        assert_eq!(
            err.to_string(),
            "Forge simulator not found at provided path: /nope/forge.jar (Build forge-gui-desktop first)"
        );
    }

    #[test]
    fn test_missing_hint_leaves_message_untouched() {
        let err = BenchmarkError::from(BenchmarkErrorKind::InvalidWorkerCount { count: 0 })
            .with_hint(None::<String>);

        assert!(err.hint().is_none());
        assert!(err.to_string().starts_with("Invalid worker count: 0"));
        assert!(err.partial_summary().is_none());
    }
}
