//! Folding outcomes into per-configuration tallies, and the run summary.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;

use crate::{
    benchmark::parser::OutcomeRecord,
    core::{config::Controller, utils::percentage},
};

/// Labels the simulator puts in front of the seat number in player names
const SEAT_LABELS: &[&str] = &["Ai", "LLM"];

/// `Ai(1)`, `LLM(10)`: a seat label directly followed by the full seat number
static SEAT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:{})\((\d+)\)", SEAT_LABELS.join("|")))
        .expect("valid seat token pattern")
});

/// The seat a winner name refers to.
///
/// The whole digit run inside the parentheses is read, so `Ai(10)` is seat
/// 10 and never seat 1. A name mentioning several different seats is
/// ambiguous and yields `None`, as does a name without any seat token.
pub fn seat_ordinal(winner: &str) -> Option<u32> {
    let seats: BTreeSet<u32> = SEAT_TOKEN
        .captures_iter(winner)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();

    match seats.len() {
        1 => seats.into_iter().next(),
        _ => None,
    }
}

/// Win/draw tally of one configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    /// Winner name as printed by the simulator, to number of wins
    pub wins: BTreeMap<String, u32>,
    pub draws: u32,
    pub games: u32,
}

/// Wins grouped by seat number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeatWins {
    pub by_seat: BTreeMap<u32, u32>,
    pub unattributed: u32,
}

impl SeatWins {
    pub fn seat(&self, ordinal: u32) -> u32 {
        self.by_seat.get(&ordinal).copied().unwrap_or(0)
    }
}

impl AggregateResult {
    pub fn fold<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = OutcomeRecord>,
    {
        for record in records {
            match record {
                OutcomeRecord::Win { winner, .. } => *self.wins.entry(winner).or_insert(0) += 1,
                OutcomeRecord::Draw { .. } => self.draws += 1,
            }
            self.games += 1;
        }
    }

    pub fn wins_by_seat(&self) -> SeatWins {
        let mut seat_wins = SeatWins::default();

        for (winner, count) in &self.wins {
            match seat_ordinal(winner) {
                Some(ordinal) => *seat_wins.by_seat.entry(ordinal).or_insert(0) += count,
                None => {
                    tracing::debug!("Could not attribute winner '{winner}' to a seat");
                    seat_wins.unattributed += count;
                }
            }
        }

        seat_wins
    }

    pub fn draw_percentage(&self) -> f64 {
        percentage(self.draws, self.games)
    }
}

/// One of the two sides being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Competitor {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompetitorInfo {
    pub deck: String,
    pub controller: Controller,
}

/// Outcome of one configuration, including which competitor sat where
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationResult {
    pub name: String,
    /// `seats[0]` is seat 1
    pub seats: [Competitor; 2],
    #[serde(flatten)]
    pub aggregate: AggregateResult,
    pub jobs_attempted: usize,
    pub jobs_failed: usize,
    /// Failure tag to number of jobs
    pub failures: BTreeMap<String, usize>,
}

impl ConfigurationResult {
    pub fn new(name: impl Into<String>, seats: [Competitor; 2]) -> Self {
        Self {
            name: name.into(),
            seats,
            aggregate: AggregateResult::default(),
            jobs_attempted: 0,
            jobs_failed: 0,
            failures: BTreeMap::new(),
        }
    }

    /// Which competitor sat in seat `ordinal` (1-based)
    pub fn competitor_in_seat(&self, ordinal: u32) -> Option<Competitor> {
        let index = usize::try_from(ordinal.checked_sub(1)?).ok()?;
        self.seats.get(index).copied()
    }

    pub fn record_failure(&mut self, tag: &str) {
        self.jobs_failed += 1;
        *self.failures.entry(tag.to_string()).or_insert(0) += 1;
    }

    pub fn wins_by_competitor(&self) -> (BTreeMap<Competitor, u32>, u32) {
        let seat_wins = self.aggregate.wins_by_seat();
        let mut by_competitor = BTreeMap::new();
        let mut unattributed = seat_wins.unattributed;

        for (ordinal, count) in seat_wins.by_seat {
            match self.competitor_in_seat(ordinal) {
                Some(competitor) => *by_competitor.entry(competitor).or_insert(0) += count,
                None => unattributed += count,
            }
        }

        (by_competitor, unattributed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTotals {
    pub total_games: u32,
    #[serde(rename = "deck1_wins")]
    pub competitor_a_wins: u32,
    #[serde(rename = "deck2_wins")]
    pub competitor_b_wins: u32,
    pub unattributed_wins: u32,
    pub draws: u32,
    #[serde(rename = "deck1_win_percentage")]
    pub competitor_a_win_percentage: f64,
    #[serde(rename = "deck2_win_percentage")]
    pub competitor_b_win_percentage: f64,
    pub draw_percentage: f64,
    pub jobs_attempted: usize,
    pub jobs_failed: usize,
}

/// Final result of a run, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub competitors: BTreeMap<Competitor, CompetitorInfo>,
    pub configurations: BTreeMap<String, ConfigurationResult>,
    pub summary: SummaryTotals,
}

impl BenchmarkSummary {
    /// Totals are plain sums over the configurations
    pub fn new(
        competitor_a: CompetitorInfo,
        competitor_b: CompetitorInfo,
        configurations: Vec<ConfigurationResult>,
    ) -> Self {
        let mut totals = SummaryTotals::default();

        for configuration in &configurations {
            let (by_competitor, unattributed) = configuration.wins_by_competitor();
            totals.competitor_a_wins += by_competitor.get(&Competitor::A).copied().unwrap_or(0);
            totals.competitor_b_wins += by_competitor.get(&Competitor::B).copied().unwrap_or(0);
            totals.unattributed_wins += unattributed;
            totals.draws += configuration.aggregate.draws;
            totals.total_games += configuration.aggregate.games;
            totals.jobs_attempted += configuration.jobs_attempted;
            totals.jobs_failed += configuration.jobs_failed;
        }

        totals.competitor_a_win_percentage =
            percentage(totals.competitor_a_wins, totals.total_games);
        totals.competitor_b_win_percentage =
            percentage(totals.competitor_b_wins, totals.total_games);
        totals.draw_percentage = percentage(totals.draws, totals.total_games);

        Self {
            competitors: BTreeMap::from([(Competitor::A, competitor_a), (Competitor::B, competitor_b)]),
            configurations: configurations
                .into_iter()
                .map(|configuration| (configuration.name.clone(), configuration))
                .collect(),
            summary: totals,
        }
    }
}
