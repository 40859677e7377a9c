//! Main binary entrypoint for the forge-bench tool.
//!
//! Parses CLI arguments, sets up logging, and dispatches to subcommands.

use clap::{Parser, Subcommand};
use forge_bench::{
    BenchmarkConfig, GlobalConfig, Result, benchmark,
    core::{
        Controller,
        config::{
            BenchmarkOverrides, DEFAULT_CONFIG_FILE, GlobalOverrides, apply_cli_overrides,
            create_figment_from_file,
        },
        resources::{self, ServiceStatus},
    },
};
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "forge-bench")]
#[command(about = "Parallel Forge match simulation benchmarking tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Simulator jar or executable")]
    simulator_path: Option<PathBuf>,

    #[arg(long, global = true, help = "Java runtime used to start a simulator jar")]
    java_path: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play two decks against each other, in both seatings
    Benchmark {
        deck_a: Option<String>,

        deck_b: Option<String>,

        #[arg(long, alias = "num-sims", help = "Games per configuration")]
        repetitions: Option<u32>,

        #[arg(long)]
        max_workers: Option<usize>,

        #[arg(long)]
        games_per_job: Option<u32>,

        #[arg(long, value_enum)]
        controller_a: Option<Controller>,

        #[arg(long, value_enum)]
        controller_b: Option<Controller>,

        #[arg(long, help = "Seconds a single simulator run may take")]
        job_timeout: Option<u64>,

        #[arg(long, help = "Seconds a whole configuration may take")]
        batch_timeout: Option<u64>,

        #[arg(long = "format")]
        game_format: Option<String>,

        #[arg(long)]
        llm_endpoint: Option<String>,

        #[arg(long, help = "Only play Deck1 vs Deck2, not the swapped seating")]
        no_mirror: bool,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        template_path: Option<PathBuf>,
    },
    /// Show memory, CPU, running simulator processes and the decision service
    Check {
        #[arg(long)]
        llm_endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse input
    let cli = Cli::parse();

    // Toggle the tracing level
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let result = match cli.command {
        Commands::Check { llm_endpoint } => run_check(&cli.config, llm_endpoint).await,

        Commands::Benchmark {
            deck_a,
            deck_b,
            repetitions,
            max_workers,
            games_per_job,
            controller_a,
            controller_b,
            job_timeout,
            batch_timeout,
            game_format,
            llm_endpoint,
            no_mirror,
            output,
            template_path,
        } => {
            let global_overrides = GlobalOverrides {
                simulator_path: cli.simulator_path,
                java_path: cli.java_path,
                verbose: cli.verbose,
            };
            let benchmark_overrides = BenchmarkOverrides {
                deck_a,
                deck_b,
                controller_a,
                controller_b,
                repetitions,
                max_workers,
                games_per_job,
                job_timeout_secs: job_timeout,
                batch_timeout_secs: batch_timeout,
                game_format,
                llm_endpoint,
                mirror: no_mirror.then_some(false),
                output,
                template_path,
            };

            run_benchmark(&cli.config, global_overrides, benchmark_overrides).await
        }
    };

    // If any command results in an error, print and exit
    if let Err(e) = result {
        tracing::error!("{e}");

        std::process::exit(1);
    }

    Ok(())
}

async fn run_check(config_path: &std::path::Path, llm_endpoint: Option<String>) -> Result<()> {
    resources::current().await?.log();

    let figment = apply_cli_overrides(
        create_figment_from_file(config_path)?,
        GlobalOverrides::default(),
        BenchmarkOverrides {
            llm_endpoint,
            ..Default::default()
        },
    );
    let endpoint = BenchmarkConfig::from_figment(&figment)?.llm_endpoint;

    match resources::check_service(&endpoint, resources::SERVICE_CHECK_TIMEOUT).await {
        ServiceStatus::Reachable => tracing::info!("Decision service at {endpoint} is reachable"),
        status => tracing::warn!("Decision service at {endpoint} is {status}"),
    }

    Ok(())
}

async fn run_benchmark(
    config_path: &std::path::Path,
    global_overrides: GlobalOverrides,
    benchmark_overrides: BenchmarkOverrides,
) -> Result<()> {
    let figment = apply_cli_overrides(
        create_figment_from_file(config_path)?,
        global_overrides,
        benchmark_overrides,
    );
    let global_config = GlobalConfig::from_figment(&figment)?;
    let benchmark_config = BenchmarkConfig::from_figment(&figment)?;

    // Listen to CTRL+C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_task = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for CTRL+C: {e}");
            return;
        }
        tracing::info!("Received CTRL+C. Stopping running simulations...");
        let _ = shutdown_tx.send(true);
    });

    let result = benchmark::run(global_config, benchmark_config, shutdown_rx).await;
    shutdown_task.abort();

    result.map(|_| ())
}
