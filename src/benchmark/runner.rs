//! Running the configurations of a benchmark and folding their games into a summary

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::{
    benchmark::{
        aggregate::{BenchmarkSummary, Competitor, CompetitorInfo, ConfigurationResult},
        gamelog::GameLog,
        job::{JobFailure, JobResult, JobSpec},
        parser,
        pool::{BatchReport, JobExecutor, PoolConfig, PoolError, WorkerPool},
        process::{CancelSignal, never_cancelled},
    },
    core::{
        BenchmarkConfig, BenchmarkError, Controller, Result, error::BenchmarkErrorKind,
        format_duration, utils::slugify,
    },
};

/// Knobs of a run that stay the same for every configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub games_per_job: u32,
    pub job_timeout: Duration,
    pub batch_timeout: Duration,
    pub retrieval_timeout: Duration,
    /// Also play every configuration with the seats swapped
    pub mirror: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            games_per_job: 1,
            job_timeout: Duration::from_secs(300),
            batch_timeout: Duration::from_secs(600),
            retrieval_timeout: Duration::from_secs(30),
            mirror: true,
        }
    }
}

impl From<&BenchmarkConfig> for OrchestratorSettings {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            games_per_job: config.games_per_job,
            job_timeout: config.job_timeout(),
            batch_timeout: config.batch_timeout(),
            retrieval_timeout: config.retrieval_timeout(),
            mirror: config.mirror,
        }
    }
}

/// One seating of the two competitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// e.g. `Deck1(AI) vs Deck2(LLM)`
    pub name: String,
    /// `seats[0]` plays first
    pub seats: [Competitor; 2],
    decks: [String; 2],
    controllers: [Controller; 2],
}

impl Configuration {
    pub fn new(first: (Competitor, &CompetitorInfo), second: (Competitor, &CompetitorInfo)) -> Self {
        let name = format!(
            "{}({}) vs {}({})",
            competitor_label(first.0),
            first.1.controller,
            competitor_label(second.0),
            second.1.controller
        );

        Self {
            name,
            seats: [first.0, second.0],
            decks: [first.1.deck.clone(), second.1.deck.clone()],
            controllers: [first.1.controller, second.1.controller],
        }
    }

    /// Split `repetitions` games into jobs of at most `games_per_job` games
    pub fn jobs(&self, repetitions: u32, games_per_job: u32) -> Vec<JobSpec> {
        let games_per_job = games_per_job.max(1);
        let slug = slugify(&self.name);
        let mut jobs = Vec::new();
        let mut remaining = repetitions;

        while remaining > 0 {
            let games = remaining.min(games_per_job);
            jobs.push(JobSpec::new(
                &slug,
                jobs.len() + 1,
                [&self.decks[0], &self.decks[1]],
                self.controllers,
                games,
            ));
            remaining -= games;
        }

        jobs
    }
}

fn competitor_label(competitor: Competitor) -> &'static str {
    match competitor {
        Competitor::A => "Deck1",
        Competitor::B => "Deck2",
    }
}

/// "A vs B", then "B vs A" when mirrored
pub fn configurations(a: &CompetitorInfo, b: &CompetitorInfo, mirror: bool) -> Vec<Configuration> {
    let mut configurations = vec![Configuration::new((Competitor::A, a), (Competitor::B, b))];
    if mirror {
        configurations.push(Configuration::new((Competitor::B, b), (Competitor::A, a)));
    }
    configurations
}

pub struct BenchmarkOrchestrator<E: JobExecutor + Clone> {
    executor: E,
    settings: OrchestratorSettings,
    game_log: Option<GameLog>,
    shutdown: CancelSignal,
    show_progress: bool,
}

/// Runs the configurations one after another, each as one batch on the pool
impl<E: JobExecutor + Clone> BenchmarkOrchestrator<E> {
    pub fn new(executor: E, settings: OrchestratorSettings) -> Self {
        Self {
            executor,
            settings,
            game_log: None,
            shutdown: never_cancelled(),
            show_progress: true,
        }
    }

    pub fn with_game_log(mut self, game_log: GameLog) -> Self {
        self.game_log = Some(game_log);
        self
    }

    /// Stops the running configuration and skips the rest once it fires
    pub fn with_shutdown(mut self, shutdown: CancelSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub async fn run(
        &self,
        competitor_a: CompetitorInfo,
        competitor_b: CompetitorInfo,
        repetitions: u32,
        max_workers: usize,
    ) -> Result<BenchmarkSummary> {
        if repetitions == 0 {
            return Err(BenchmarkErrorKind::InvalidRepetitions { count: repetitions }.into());
        }

        let pool_config = PoolConfig {
            max_workers,
            job_timeout: self.settings.job_timeout,
            batch_timeout: self.settings.batch_timeout,
            retrieval_timeout: self.settings.retrieval_timeout,
            ..PoolConfig::default()
        };
        let pool = WorkerPool::new(self.executor.clone(), pool_config).map_err(pool_error)?;

        let start = Instant::now();
        let mut results = Vec::new();
        let mut stalled = None;

        for configuration in configurations(&competitor_a, &competitor_b, self.settings.mirror) {
            if *self.shutdown.borrow() {
                tracing::warn!("Skipping configuration {} after shutdown", configuration.name);
                continue;
            }

            let (result, report) = self
                .run_configuration(&pool, &configuration, repetitions)
                .await?;
            results.push(result);

            if report.interrupted {
                tracing::warn!("Configuration {} was interrupted", configuration.name);
            }
            // Nothing was played at all
            if report.batch_timed_out && report.attempted() > 0 && report.cancelled() == report.attempted()
            {
                stalled = Some((configuration.name, report.attempted()));
                break;
            }
        }

        let summary = BenchmarkSummary::new(competitor_a, competitor_b, results);

        if let Some((configuration, attempted)) = stalled {
            return Err(BenchmarkError::from(BenchmarkErrorKind::BatchTimedOut {
                configuration,
                attempted,
                partial: Box::new(summary),
            })
            .with_hint(Some(
                "Raise the batch timeout, or lower the repetitions per configuration",
            )));
        }

        tracing::info!(
            "Benchmark finished in {}: {} game(s), {} job(s) failed of {}",
            format_duration(start.elapsed()),
            summary.summary.total_games,
            summary.summary.jobs_failed,
            summary.summary.jobs_attempted
        );

        Ok(summary)
    }

    async fn run_configuration(
        &self,
        pool: &WorkerPool<E>,
        configuration: &Configuration,
        repetitions: u32,
    ) -> Result<(ConfigurationResult, BatchReport)> {
        tracing::info!("Running configuration: {}", configuration.name);

        let jobs = configuration.jobs(repetitions, self.settings.games_per_job);
        let total_jobs = jobs.len();
        let progress = self.progress_bar(total_jobs)?;
        let start = Instant::now();

        let mut result = ConfigurationResult::new(configuration.name.clone(), configuration.seats);
        let mut delivered = 0usize;

        let report = pool
            .run_all_with(jobs, self.shutdown.clone(), |spec, job_result| {
                self.fold_job(configuration, &mut result, spec, job_result);

                delivered += 1;
                progress.set_position(delivered as u64);

                let remaining = total_jobs.saturating_sub(delivered);
                if remaining > 0 {
                    let estimated_remaining = start.elapsed() / delivered as u32 * remaining as u32;
                    progress.set_message(format!(
                        "{} [ETA: {}]",
                        configuration.name,
                        format_duration(estimated_remaining)
                    ));
                }
            })
            .await
            .map_err(pool_error)?;

        progress.finish_with_message(format!("{} complete", configuration.name));

        tracing::info!(
            "{}: {} game(s), {} draw(s), {}/{} job(s) failed",
            configuration.name,
            result.aggregate.games,
            result.aggregate.draws,
            result.jobs_failed,
            result.jobs_attempted
        );

        Ok((result, report))
    }

    /// Parse one delivered job and add its games to the configuration
    fn fold_job(
        &self,
        configuration: &Configuration,
        result: &mut ConfigurationResult,
        spec: &JobSpec,
        job_result: &JobResult,
    ) {
        result.jobs_attempted += 1;

        match &job_result.outcome {
            Ok(output) => {
                let records = parser::parse_game_results(output);
                if records.is_empty() {
                    tracing::warn!(job_id = %spec.id, "No game results found in output of {}", spec.label);
                }

                if let Some(game_log) = &self.game_log {
                    if let Err(e) = game_log.append(&configuration.name, &spec.label, output) {
                        tracing::warn!("Could not write game log for {}: {e}", spec.label);
                    }
                }

                result.aggregate.fold(records);
            }
            Err(failure) => {
                if let JobFailure::NonZeroExit { stderr, .. } = failure {
                    tracing::debug!(job_id = %spec.id, "Simulator stderr:\n{stderr}");
                }
                result.record_failure(failure.tag());
            }
        }
    }

    fn progress_bar(&self, total_jobs: usize) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let progress = ProgressBar::new(total_jobs as u64);
        progress.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=="),
        );
        progress.enable_steady_tick(Duration::from_millis(100));
        Ok(progress)
    }
}

fn pool_error(error: PoolError) -> BenchmarkError {
    match error {
        PoolError::NoWorkers => BenchmarkErrorKind::InvalidWorkerCount { count: 0 }.into(),
        PoolError::WorkerPanicked {
            job_id,
            completed,
            abandoned,
        } => BenchmarkErrorKind::WorkerPool {
            reason: format!("worker for job {job_id} panicked"),
            completed,
            abandoned,
        }
        .into(),
    }
}
