use std::path::Path;

use serde::Serialize;

use crate::{
    Result,
    benchmark::aggregate::{Competitor, ConfigurationResult},
    core::output::{ResultWriter, WriteData, ensure_output_dir},
};

pub const CSV_FILE_NAME: &str = "results.csv";

/// `results.csv`, one row per configuration and a final `Overall` row
pub struct CsvWriter;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    configuration: &'a str,
    deck1_wins: u32,
    deck2_wins: u32,
    unattributed_wins: u32,
    draws: u32,
    games: u32,
    jobs_attempted: usize,
    jobs_failed: usize,
}

impl<'a> CsvRow<'a> {
    fn from_configuration(configuration: &'a ConfigurationResult) -> Self {
        let (wins, unattributed_wins) = configuration.wins_by_competitor();

        Self {
            configuration: &configuration.name,
            deck1_wins: wins.get(&Competitor::A).copied().unwrap_or(0),
            deck2_wins: wins.get(&Competitor::B).copied().unwrap_or(0),
            unattributed_wins,
            draws: configuration.aggregate.draws,
            games: configuration.aggregate.games,
            jobs_attempted: configuration.jobs_attempted,
            jobs_failed: configuration.jobs_failed,
        }
    }
}

impl ResultWriter for CsvWriter {
    fn write(&self, data: &WriteData, path: &Path) -> Result<()> {
        ensure_output_dir(path)?;

        let csv_path = path.join(CSV_FILE_NAME);
        let mut writer = csv::Writer::from_path(&csv_path)?;

        for configuration in data.summary.configurations.values() {
            writer.serialize(CsvRow::from_configuration(configuration))?;
        }

        let totals = &data.summary.summary;
        writer.serialize(CsvRow {
            configuration: "Overall",
            deck1_wins: totals.competitor_a_wins,
            deck2_wins: totals.competitor_b_wins,
            unattributed_wins: totals.unattributed_wins,
            draws: totals.draws,
            games: totals.total_games,
            jobs_attempted: totals.jobs_attempted,
            jobs_failed: totals.jobs_failed,
        })?;

        writer.flush()?;
        tracing::info!("Results written to {}", csv_path.display());
        Ok(())
    }
}
