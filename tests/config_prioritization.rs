//! Tests for configuration prioritization.
//!
//! Configuration values are resolved according to this priority hierarchy:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (FORGE_BENCH_*)
//! 3. Config file
//! 4. Default values (lowest priority)
//!
//! # Note on Test Execution
//!
//! Environment variables are process-global, so every test runs inside a
//! `figment::Jail`, which serializes the tests and restores the environment
//! and working directory afterwards.
//!
//! # Environment Variable Format
//!
//! Environment variables use double underscore (`__`) to separate the section from
//! the field name. For example:
//! - `FORGE_BENCH_BENCHMARK__MAX_WORKERS` → `benchmark.max_workers`
//! - `FORGE_BENCH_GLOBAL__SIMULATOR_PATH` → `global.simulator_path`

use figment::Jail;
use forge_bench::core::{
    Controller,
    config::{
        BenchmarkConfig, BenchmarkOverrides, DEFAULT_CONFIG_FILE, GlobalConfig, GlobalOverrides,
        apply_cli_overrides, create_figment_from_file,
    },
};
use std::path::{Path, PathBuf};

// =============================================================================
// Helper Functions
// =============================================================================

/// Load both sections the way the binary does, without CLI values
fn load(jail: &Jail) -> figment::error::Result<(GlobalConfig, BenchmarkConfig)> {
    load_with(jail, GlobalOverrides::default(), BenchmarkOverrides::default())
}

fn load_with(
    _jail: &Jail,
    global: GlobalOverrides,
    benchmark: BenchmarkOverrides,
) -> figment::error::Result<(GlobalConfig, BenchmarkConfig)> {
    let figment = create_figment_from_file(Path::new(DEFAULT_CONFIG_FILE))
        .map_err(|e| e.to_string())?;
    let figment = apply_cli_overrides(figment, global, benchmark);

    let global = GlobalConfig::from_figment(&figment).map_err(|e| e.to_string())?;
    let benchmark = BenchmarkConfig::from_figment(&figment).map_err(|e| e.to_string())?;
    Ok((global, benchmark))
}

// =============================================================================
// Default Value Tests
// =============================================================================

#[test]
fn test_default_values_without_config_file() {
    Jail::expect_with(|jail| {
        let (global, benchmark) = load(jail)?;

        assert!(global.simulator_path.is_none());
        assert_eq!(global.java_path, PathBuf::from("java"));
        assert!(!global.verbose);

        assert_eq!(benchmark.repetitions, 5, "Default repetitions should be 5");
        assert_eq!(benchmark.max_workers, 4, "Default max_workers should be 4");
        assert_eq!(benchmark.games_per_job, 1);
        assert_eq!(benchmark.job_timeout_secs, 300);
        assert_eq!(benchmark.batch_timeout_secs, 600);
        assert_eq!(benchmark.game_format, "Commander");
        assert_eq!(benchmark.llm_endpoint, "http://localhost:7861");
        assert_eq!(benchmark.controller_a, Controller::Ai);
        assert!(benchmark.mirror, "Mirrored configurations should be on by default");
        assert!(benchmark.output.is_none(), "Default output should be None");
        Ok(())
    });
}

// =============================================================================
// Config File Tests
// =============================================================================

#[test]
fn test_config_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            DEFAULT_CONFIG_FILE,
            r#"
            [global]
            simulator_path = "/opt/forge/forge.jar"

            [benchmark]
            deck_a = "atraxa.dck"
            deck_b = "edgar.dck"
            controller_b = "llm"
            max_workers = 2
            mirror = false
            "#,
        )?;

        let (global, benchmark) = load(jail)?;

        assert_eq!(
            global.simulator_path,
            Some(PathBuf::from("/opt/forge/forge.jar"))
        );
        assert_eq!(benchmark.deck_a, "atraxa.dck");
        assert_eq!(benchmark.controller_b, Controller::Llm);
        assert_eq!(benchmark.max_workers, 2);
        assert!(!benchmark.mirror);
        // Untouched values keep their defaults
        assert_eq!(benchmark.repetitions, 5);
        Ok(())
    });
}

#[test]
fn test_invalid_controller_in_config_file_is_an_error() {
    Jail::expect_with(|jail| {
        jail.create_file(
            DEFAULT_CONFIG_FILE,
            r#"
            [benchmark]
            controller_a = "human"
            "#,
        )?;

        assert!(load(jail).is_err());
        Ok(())
    });
}

// =============================================================================
// Environment Variable Tests
// =============================================================================

#[test]
fn test_env_overrides_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            DEFAULT_CONFIG_FILE,
            r#"
            [benchmark]
            max_workers = 2
            repetitions = 10
            "#,
        )?;
        jail.set_env("FORGE_BENCH_BENCHMARK__MAX_WORKERS", "8");
        jail.set_env("FORGE_BENCH_GLOBAL__JAVA_PATH", "/usr/lib/jvm/bin/java");

        let (global, benchmark) = load(jail)?;

        assert_eq!(benchmark.max_workers, 8, "Env should win over the file");
        assert_eq!(benchmark.repetitions, 10, "File value without env stays");
        assert_eq!(global.java_path, PathBuf::from("/usr/lib/jvm/bin/java"));
        Ok(())
    });
}

#[test]
fn test_env_can_lift_the_batch_limit() {
    Jail::expect_with(|jail| {
        jail.set_env("FORGE_BENCH_BENCHMARK__BATCH_TIMEOUT_SECS", u64::MAX.to_string());
        jail.set_env("FORGE_BENCH_BENCHMARK__DECK_A", "a.dck");
        jail.set_env("FORGE_BENCH_BENCHMARK__DECK_B", "b.dck");

        let (_, benchmark) = load(jail)?;

        assert_eq!(benchmark.batch_timeout_secs, u64::MAX);
        assert!(benchmark.validate().is_ok());
        Ok(())
    });
}

// =============================================================================
// CLI Override Tests
// =============================================================================

#[test]
fn test_cli_overrides_env_and_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            DEFAULT_CONFIG_FILE,
            r#"
            [benchmark]
            repetitions = 10
            game_format = "Constructed"
            "#,
        )?;
        jail.set_env("FORGE_BENCH_BENCHMARK__REPETITIONS", "20");

        let (global, benchmark) = load_with(
            jail,
            GlobalOverrides {
                verbose: true,
                ..Default::default()
            },
            BenchmarkOverrides {
                repetitions: Some(3),
                controller_a: Some(Controller::Llm),
                mirror: Some(false),
                ..Default::default()
            },
        )?;

        assert!(global.verbose);
        assert_eq!(benchmark.repetitions, 3, "CLI should win over env and file");
        assert_eq!(benchmark.controller_a, Controller::Llm);
        assert!(!benchmark.mirror);
        assert_eq!(
            benchmark.game_format, "Constructed",
            "Unset CLI values must not clobber the file"
        );
        Ok(())
    });
}

#[test]
fn test_missing_custom_config_file_is_ignored() {
    Jail::expect_with(|_jail| {
        let figment = create_figment_from_file(Path::new("does-not-exist.toml"))
            .map_err(|e| e.to_string())?;
        let benchmark = BenchmarkConfig::from_figment(&figment).map_err(|e| e.to_string())?;

        assert_eq!(benchmark.max_workers, 4);
        Ok(())
    });
}
