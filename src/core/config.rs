//! Layered configuration: defaults, TOML file, `FORGE_BENCH_*` environment, CLI.

use std::{fmt, path::Path, path::PathBuf, str::FromStr, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::error::{BenchmarkErrorKind, Result};

/// Config file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "forge-bench.toml";

/// Prefix of the environment variables read into the configuration
pub const ENV_PREFIX: &str = "FORGE_BENCH_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub simulator_path: Option<PathBuf>,
    pub java_path: PathBuf,
    pub verbose: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            simulator_path: None,
            java_path: PathBuf::from("java"),
            verbose: false,
        }
    }
}

impl GlobalConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment
            .focus("global")
            .extract()
            .map_err(BenchmarkErrorKind::from)?)
    }
}

/// Who makes the decisions for a seat in the simulated game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Controller {
    Ai,
    Llm,
}

impl Controller {
    /// Token understood by the simulator's `-c` flag
    pub fn as_arg(&self) -> &'static str {
        match self {
            Controller::Ai => "ai",
            Controller::Llm => "llm",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Controller::Ai => write!(f, "AI"),
            Controller::Llm => write!(f, "LLM"),
        }
    }
}

impl FromStr for Controller {
    type Err = BenchmarkErrorKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(Controller::Ai),
            "llm" => Ok(Controller::Llm),
            _ => Err(BenchmarkErrorKind::InvalidController {
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub deck_a: String,
    pub deck_b: String,
    pub controller_a: Controller,
    pub controller_b: Controller,
    /// Games per configuration, one job each unless `games_per_job` says otherwise
    pub repetitions: u32,
    pub max_workers: usize,
    pub games_per_job: u32,
    pub job_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
    pub grace_period_ms: u64,
    pub game_format: String,
    pub llm_endpoint: String,
    /// Also run the configuration with the seats swapped
    pub mirror: bool,
    pub output: Option<PathBuf>,
    pub template_path: Option<PathBuf>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            deck_a: String::new(),
            deck_b: String::new(),
            controller_a: Controller::Ai,
            controller_b: Controller::Ai,
            repetitions: 5,
            max_workers: 4,
            games_per_job: 1,
            job_timeout_secs: 300,
            batch_timeout_secs: 600,
            retrieval_timeout_secs: 30,
            grace_period_ms: 5000,
            game_format: "Commander".to_string(),
            llm_endpoint: "http://localhost:7861".to_string(),
            mirror: true,
            output: None,
            template_path: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment
            .focus("benchmark")
            .extract()
            .map_err(BenchmarkErrorKind::from)?)
    }

    pub fn validate(&self) -> Result<()> {
        for (competitor, deck) in [("Deck1", &self.deck_a), ("Deck2", &self.deck_b)] {
            if deck.trim().is_empty() {
                return Err(BenchmarkErrorKind::MissingDeck {
                    competitor: competitor.to_string(),
                }
                .into());
            }
        }
        if self.max_workers == 0 {
            return Err(BenchmarkErrorKind::InvalidWorkerCount {
                count: self.max_workers,
            }
            .into());
        }
        if self.repetitions == 0 || self.games_per_job == 0 {
            return Err(BenchmarkErrorKind::InvalidRepetitions {
                count: self.repetitions.min(self.games_per_job),
            }
            .into());
        }
        for (name, secs) in [
            ("job_timeout_secs", self.job_timeout_secs),
            ("batch_timeout_secs", self.batch_timeout_secs),
            ("retrieval_timeout_secs", self.retrieval_timeout_secs),
        ] {
            if secs == 0 {
                return Err(BenchmarkErrorKind::InvalidTimeout { name }.into());
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Values given on the command line. Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchmarkOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_a: Option<Controller>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_b: Option<Controller>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub games_per_job: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulator_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub verbose: bool,
}

/// Build the file + environment layers
pub fn create_figment_from_file(path: &Path) -> Result<Figment> {
    if path != Path::new(DEFAULT_CONFIG_FILE) && !path.exists() {
        tracing::warn!("Config file {} does not exist, ignoring", path.display());
    }

    Ok(Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Put CLI values on top of everything else
pub fn apply_cli_overrides(
    figment: Figment,
    global: GlobalOverrides,
    benchmark: BenchmarkOverrides,
) -> Figment {
    figment
        .merge(Serialized::default("global", global))
        .merge(Serialized::default("benchmark", benchmark))
}
