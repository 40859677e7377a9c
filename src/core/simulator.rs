//! The wrapper for the Forge simulator.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;

use crate::{
    benchmark::job::JobSpec,
    core::{
        Result,
        error::{BenchmarkError, BenchmarkErrorKind},
        is_executable,
    },
};

use super::platform;

/// Environment variable carrying the job id to the simulator
pub const GAME_ID_ENV: &str = "GAME_ID";
/// Environment variable carrying the decision service address to the simulator
pub const LLM_ENDPOINT_ENV: &str = "LLM_ENDPOINT";

/// How the simulator gets started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `java -jar <jar>`, with the per-run values passed as system properties
    Jar { java: PathBuf, jar: PathBuf },
    /// Any other executable, started directly
    Native { executable: PathBuf },
}

/// Settings shared by every simulator invocation of a run
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub game_format: String,
    pub llm_endpoint: String,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            game_format: "Commander".to_string(),
            llm_endpoint: "http://localhost:7861".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorExecutor {
    launcher: Launcher,
    settings: SimulatorSettings,
}

impl SimulatorExecutor {
    pub fn new(path: PathBuf, java: PathBuf, settings: SimulatorSettings) -> Self {
        let launcher = if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
        {
            Launcher::Jar { java, jar: path }
        } else {
            Launcher::Native { executable: path }
        };

        Self { launcher, settings }
    }

    /// Find the simulator and create a SimulatorExecutor with that path
    pub fn discover(
        explicit_path: Option<PathBuf>,
        java: PathBuf,
        settings: SimulatorSettings,
    ) -> Result<Self> {
        let path = Self::find_simulator(explicit_path)?;
        Ok(Self::new(path, java, settings))
    }

    /// Find the simulator jar or executable
    pub fn find_simulator(explicit_path: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit_path {
            if path.is_file() {
                tracing::info!("Using explicit simulator path: {}", path.display());
                return Ok(path);
            }

            let hint = if path.is_dir() {
                Some("Point this at the jar-with-dependencies file, not its directory.")
            } else if path.extension().is_none() && !is_executable(&path) {
                Some("Make sure this is the path to the simulator executable itself.")
            } else {
                Some("Build Forge with the jar-with-dependencies target first.")
            };

            return Err(
                BenchmarkError::from(BenchmarkErrorKind::SimulatorNotFoundAtPath { path })
                    .with_hint(hint),
            );
        }

        // Look for a built jar in the usual checkout locations
        for forge_dir in platform::get_default_forge_dirs() {
            let pattern = forge_dir.join(platform::FORGE_JAR_GLOB);
            let mut matches: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
                .filter_map(std::result::Result::ok)
                .collect();

            // Newest version last
            matches.sort();
            if let Some(jar) = matches.pop() {
                tracing::debug!("Found Forge simulator at: {}", jar.display());
                return Ok(jar);
            }
        }

        Err(BenchmarkErrorKind::SimulatorNotFound.into())
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Path of the jar or executable that runs the games
    pub fn simulator_path(&self) -> &Path {
        match &self.launcher {
            Launcher::Jar { jar, .. } => jar,
            Launcher::Native { executable } => executable,
        }
    }

    /// Arguments following the program name, in order
    pub fn args_for(&self, job: &JobSpec) -> Vec<String> {
        let mut args = Vec::new();

        if let Launcher::Jar { jar, .. } = &self.launcher {
            args.push(format!("-Dllm.endpoint={}", self.settings.llm_endpoint));
            args.push("-Djava.net.preferIPv4Stack=true".to_string());
            args.push(format!("-Dgame.id={}", job.id));
            args.push("-jar".to_string());
            args.push(jar.to_string_lossy().into_owned());
        }

        args.extend([
            "sim".to_string(),
            "-f".to_string(),
            self.settings.game_format.clone(),
            "-d".to_string(),
            job.deck_a.clone(),
            job.deck_b.clone(),
            "-n".to_string(),
            job.games.to_string(),
            "-c".to_string(),
            job.controller_list(),
            // Quiet mode, only the game results are printed
            "-q".to_string(),
        ]);

        args
    }

    /// Ready to spawn command for one job, with both output streams captured
    pub fn command_for(&self, job: &JobSpec) -> Command {
        let program = match &self.launcher {
            Launcher::Jar { java, .. } => java,
            Launcher::Native { executable } => executable,
        };

        let mut cmd = Command::new(program);
        cmd.args(self.args_for(job))
            .env(GAME_ID_ENV, job.id.as_str())
            .env(LLM_ENDPOINT_ENV, &self.settings.llm_endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so signals reach everything the simulator starts
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Controller;

    fn job() -> JobSpec {
        JobSpec::new(
            "test",
            1,
            ["alpha.dck", "beta.dck"],
            [Controller::Llm, Controller::Ai],
            2,
        )
    }

    #[test]
    fn test_jar_launch_passes_job_id_as_system_property() {
        let executor = SimulatorExecutor::new(
            PathBuf::from("/forge/forge-gui-desktop-2.0.04-jar-with-dependencies.jar"),
            PathBuf::from("java"),
            SimulatorSettings::default(),
        );
        let job = job();
        let args = executor.args_for(&job);

        assert_eq!(args[0], "-Dllm.endpoint=http://localhost:7861");
        assert_eq!(args[2], format!("-Dgame.id={}", job.id));
        assert_eq!(args[3], "-jar");
        let sim = args.iter().position(|a| a == "sim").unwrap();
        assert_eq!(
            &args[sim..],
            [
                "sim", "-f", "Commander", "-d", "alpha.dck", "beta.dck", "-n", "2", "-c",
                "llm,ai", "-q"
            ]
        );
    }

    #[test]
    fn test_native_launch_starts_with_sim() {
        let executor = SimulatorExecutor::new(
            PathBuf::from("/usr/local/bin/forge-sim"),
            PathBuf::from("java"),
            SimulatorSettings::default(),
        );

        assert!(matches!(executor.launcher(), Launcher::Native { .. }));
        assert_eq!(executor.args_for(&job())[0], "sim");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let err = SimulatorExecutor::find_simulator(Some(PathBuf::from(
            "/definitely/not/here/forge.jar",
        )))
        .unwrap_err();

        assert!(matches!(
            err.kind(),
            BenchmarkErrorKind::SimulatorNotFoundAtPath { .. }
        ));
        assert!(err.hint().is_some());
    }
}
