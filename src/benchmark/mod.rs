pub mod aggregate;
pub mod gamelog;
pub mod job;
pub mod parser;
pub mod pool;
pub mod process;
pub mod runner;

use crate::core::{
    BenchmarkConfig, Controller, GlobalConfig, Result, SimulatorExecutor, output,
    resources::{self, ServiceStatus},
    simulator::SimulatorSettings,
};

use aggregate::{BenchmarkSummary, CompetitorInfo};
use gamelog::GameLog;
use process::{CancelSignal, ProcessRunner};
use runner::{BenchmarkOrchestrator, OrchestratorSettings};

/// Run every configuration of `benchmark_config` and write the artifacts.
///
/// `shutdown` ends the run early; whatever finished by then is still reported.
/// A stalled configuration is an error, but the configurations played up to
/// it are written out first.
pub async fn run(
    global_config: GlobalConfig,
    benchmark_config: BenchmarkConfig,
    shutdown: CancelSignal,
) -> Result<BenchmarkSummary> {
    tracing::debug!("Starting benchmark with config: {:?}", benchmark_config);
    benchmark_config.validate()?;

    let simulator = SimulatorExecutor::discover(
        global_config.simulator_path,
        global_config.java_path,
        SimulatorSettings {
            game_format: benchmark_config.game_format.clone(),
            llm_endpoint: benchmark_config.llm_endpoint.clone(),
        },
    )?;
    tracing::info!("Using Forge at: {}", simulator.simulator_path().display());

    match resources::current().await {
        Ok(snapshot) => {
            tracing::debug!(
                "Memory {:.1}% used, CPU {:.1}%",
                snapshot.memory_percent(),
                snapshot.cpu_usage
            );
            if !snapshot.simulator_processes.is_empty() {
                tracing::warn!(
                    "{} simulator-like process(es) already running, results may be slower than usual",
                    snapshot.simulator_processes.len()
                );
            }
        }
        Err(e) => tracing::warn!("Could not take a resource snapshot: {e}"),
    }

    if [benchmark_config.controller_a, benchmark_config.controller_b].contains(&Controller::Llm) {
        let status = resources::check_service(
            &benchmark_config.llm_endpoint,
            resources::SERVICE_CHECK_TIMEOUT,
        )
        .await;
        if status != ServiceStatus::Reachable {
            tracing::warn!(
                "Decision service at {} is {status}, LLM games will likely fail",
                benchmark_config.llm_endpoint
            );
        }
    }

    let process_runner = ProcessRunner::new(simulator)
        .with_grace_period(benchmark_config.grace_period())
        .with_retrieval_timeout(benchmark_config.retrieval_timeout());

    let mut orchestrator =
        BenchmarkOrchestrator::new(process_runner, OrchestratorSettings::from(&benchmark_config))
            .with_shutdown(shutdown);
    if let Some(output_dir) = &benchmark_config.output {
        orchestrator = orchestrator.with_game_log(GameLog::new(output_dir));
    }

    let outcome = orchestrator
        .run(
            CompetitorInfo {
                deck: benchmark_config.deck_a.clone(),
                controller: benchmark_config.controller_a,
            },
            CompetitorInfo {
                deck: benchmark_config.deck_b.clone(),
                controller: benchmark_config.controller_b,
            },
            benchmark_config.repetitions,
            benchmark_config.max_workers,
        )
        .await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            // Keep whatever the earlier configurations played
            if let Some(partial) = e.partial_summary() {
                log_summary(partial);
                if let Some(output_dir) = &benchmark_config.output {
                    if let Err(write_error) = output::write_results(
                        partial,
                        output_dir,
                        benchmark_config.template_path.as_deref(),
                    ) {
                        tracing::error!("Could not write partial results: {write_error}");
                    }
                }
            }
            return Err(e);
        }
    };

    log_summary(&summary);

    match &benchmark_config.output {
        Some(output_dir) => {
            tracing::debug!("Output directory: {}", output_dir.display());
            output::write_results(
                &summary,
                output_dir,
                benchmark_config.template_path.as_deref(),
            )?;
        }
        None => tracing::info!("No output directory given, results were not saved"),
    }

    Ok(summary)
}

fn log_summary(summary: &BenchmarkSummary) {
    let totals = &summary.summary;

    tracing::info!("Overall results over {} game(s):", totals.total_games);
    tracing::info!(
        "  Deck1 wins: {} ({:.1}%)",
        totals.competitor_a_wins,
        totals.competitor_a_win_percentage
    );
    tracing::info!(
        "  Deck2 wins: {} ({:.1}%)",
        totals.competitor_b_wins,
        totals.competitor_b_win_percentage
    );
    tracing::info!("  Draws: {} ({:.1}%)", totals.draws, totals.draw_percentage);
    if totals.unattributed_wins > 0 {
        tracing::warn!(
            "  {} win(s) could not be attributed to either deck",
            totals.unattributed_wins
        );
    }
    if totals.jobs_failed > 0 {
        tracing::warn!(
            "  {} of {} job(s) failed",
            totals.jobs_failed,
            totals.jobs_attempted
        );
    }
}
