use std::path::{Path, PathBuf};

use chrono::Local;
use handlebars::Handlebars;
use serde_json::json;

use crate::{
    benchmark::aggregate::{Competitor, CompetitorInfo},
    core::{
        error::Result,
        output::{ResultWriter, WriteData, ensure_output_dir},
        platform,
        utils::percentage,
    },
};

const REPORT_FILE_NAME: &str = "results.md";

const TPL_STR: &str = "# Forge Benchmark Results\n\n**Platform:** {{platform}}\n**Date:** {{date}}\n\n## Competitors\n* **Deck1:** {{deck1.deck}} ({{deck1.controller}})\n* **Deck2:** {{deck2.deck}} ({{deck2.controller}})\n\n## Configurations\n| Configuration | Deck1 wins | Deck2 wins | Unattributed | Draws | Games | Failed jobs |\n|---------------|------------|------------|--------------|-------|-------|-------------|\n{{#each configurations}}\n| {{name}} | {{deck1_wins}} | {{deck2_wins}} | {{unattributed}} | {{draws}} | {{games}} | {{jobs_failed}}/{{jobs_attempted}} |\n{{/each}}\n\n## Overall\n| | Wins | Share |\n|---|------|-------|\n| Deck1 | {{summary.deck1_wins}} | {{deck1_share}} |\n| Deck2 | {{summary.deck2_wins}} | {{deck2_share}} |\n| Draws | {{summary.draws}} | {{draw_share}} |\n\n{{summary.total_games}} game(s) counted, {{summary.jobs_failed}} of {{summary.jobs_attempted}} job(s) failed.\n";

/// `results.md`, rendered with Handlebars
pub struct ReportWriter;

impl ResultWriter for ReportWriter {
    fn write(&self, data: &WriteData, path: &Path) -> Result<()> {
        ensure_output_dir(path)?;

        let mut handlebars = Handlebars::new();
        let results_path = match data.template_path {
            Some(template_path) => {
                // `report.html.hbs` renders to `report.html`
                let file_name = if template_path.extension().and_then(|s| s.to_str()) == Some("hbs") {
                    template_path
                        .file_stem()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(REPORT_FILE_NAME))
                } else {
                    PathBuf::from(REPORT_FILE_NAME)
                };

                handlebars.register_template_file("benchmark", template_path)?;
                path.join(file_name)
            }
            None => {
                handlebars.register_template_string("benchmark", TPL_STR)?;
                path.join(REPORT_FILE_NAME)
            }
        };

        let summary = data.summary;
        let configurations: Vec<_> = summary
            .configurations
            .values()
            .map(|configuration| {
                let (wins, unattributed) = configuration.wins_by_competitor();
                json!({
                    "name": configuration.name,
                    "deck1_wins": wins.get(&Competitor::A).copied().unwrap_or(0),
                    "deck2_wins": wins.get(&Competitor::B).copied().unwrap_or(0),
                    "unattributed": unattributed,
                    "draws": configuration.aggregate.draws,
                    "games": configuration.aggregate.games,
                    "jobs_attempted": configuration.jobs_attempted,
                    "jobs_failed": configuration.jobs_failed,
                })
            })
            .collect();

        let totals = &summary.summary;
        let share = |part: u32| format!("{:.1}%", percentage(part, totals.total_games));

        let rendered = handlebars.render(
            "benchmark",
            &json!({
                "platform": platform::get_os_info(),
                "date": Local::now().date_naive().to_string(),
                "deck1": competitor(summary.competitors.get(&Competitor::A)),
                "deck2": competitor(summary.competitors.get(&Competitor::B)),
                "configurations": configurations,
                "summary": totals,
                "deck1_share": share(totals.competitor_a_wins),
                "deck2_share": share(totals.competitor_b_wins),
                "draw_share": share(totals.draws),
            }),
        )?;

        std::fs::write(&results_path, rendered)?;

        tracing::info!("Report written to {}", results_path.display());
        Ok(())
    }
}

fn competitor(info: Option<&CompetitorInfo>) -> serde_json::Value {
    match info {
        Some(info) => json!({ "deck": info.deck, "controller": info.controller.to_string() }),
        None => json!({ "deck": "unknown", "controller": "unknown" }),
    }
}
