//! Extracting game outcomes from simulator output.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `Game Result: Game 3 ended in 51234 ms. Ai(1)-Atraxa-g3_1f0c has won!`
static WIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Game Result: Game (\d+) ended in (\d+) ms\. (.*?) has won!")
        .expect("valid win pattern")
});

/// `Game Result: Game 3 ended in a Draw!`
static DRAW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Game Result: Game (\d+) ended in a Draw!").expect("valid draw pattern")
});

/// One finished game found in the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum OutcomeRecord {
    Win {
        game: u32,
        duration_ms: u64,
        winner: String,
    },
    Draw {
        game: u32,
    },
}

impl OutcomeRecord {
    pub fn winner(&self) -> Option<&str> {
        match self {
            OutcomeRecord::Win { winner, .. } => Some(winner),
            OutcomeRecord::Draw { .. } => None,
        }
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, OutcomeRecord::Draw { .. })
    }
}

/// Every win and draw announcement in `output`, in the order they appear.
///
/// Text without announcements gives an empty list, which is a valid result.
pub fn parse_outcomes(output: &str) -> Vec<(usize, OutcomeRecord)> {
    let wins = WIN_PATTERN.captures_iter(output).filter_map(|caps| {
        let position = caps.get(0)?.start();
        Some((
            position,
            OutcomeRecord::Win {
                game: caps[1].parse().ok()?,
                duration_ms: caps[2].parse().ok()?,
                winner: caps[3].trim().to_string(),
            },
        ))
    });

    let draws = DRAW_PATTERN.captures_iter(output).filter_map(|caps| {
        let position = caps.get(0)?.start();
        Some((
            position,
            OutcomeRecord::Draw {
                game: caps[1].parse().ok()?,
            },
        ))
    });

    let mut records: Vec<(usize, OutcomeRecord)> = wins.chain(draws).collect();
    records.sort_by_key(|(position, _)| *position);
    records
}

/// [`parse_outcomes`] without the text positions
pub fn parse_game_results(output: &str) -> Vec<OutcomeRecord> {
    parse_outcomes(output)
        .into_iter()
        .map(|(_, record)| record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_has_no_outcomes() {
        assert!(parse_game_results("").is_empty());
        assert!(parse_game_results("Simulation mode\nloading decks...\n").is_empty());
    }

    #[test]
    fn test_two_wins_and_a_draw() {
        let output = "\
Game Result: Game 1 ended in 40213 ms. Ai(1)-Atraxa-g1_0a1b has won!
some noise in between
Game Result: Game 2 ended in a Draw!
Game Result: Game 3 ended in 1200 ms. LLM(2)-Edgar-g1_0a1b has won!
";
        let records = parse_game_results(output);

        assert_eq!(
            records,
            vec![
                OutcomeRecord::Win {
                    game: 1,
                    duration_ms: 40213,
                    winner: "Ai(1)-Atraxa-g1_0a1b".to_string(),
                },
                OutcomeRecord::Draw { game: 2 },
                OutcomeRecord::Win {
                    game: 3,
                    duration_ms: 1200,
                    winner: "LLM(2)-Edgar-g1_0a1b".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let output = "Game Result: Game 1 ended in a Draw!\nGame Result: Game 1 ended in 5 ms. Ai(2)-X has won!";
        assert_eq!(parse_game_results(output), parse_game_results(output));
        assert_eq!(parse_game_results(output).len(), 2);
    }

    #[test]
    fn test_win_announcement_does_not_span_lines() {
        let output = "Game Result: Game 1 ended in 5 ms. Ai(1)-X\nhas won!";
        assert!(parse_game_results(output).is_empty());
    }

    #[test]
    fn test_record_accessors() {
        let draw = OutcomeRecord::Draw { game: 1 };
        assert!(draw.is_draw());
        assert_eq!(draw.winner(), None);
    }
}
