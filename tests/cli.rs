#![cfg(unix)]

use std::{error::Error, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::tempdir;

/// Write an executable shell script standing in for the simulator
fn fake_simulator(dir: &Path, body: &str) -> Result<std::path::PathBuf, Box<dyn Error>> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};

    let path = dir.join("forge-sim");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Seat 1 always wins; `$5` is the deck in seat 1
const SEAT_ONE_WINS: &str =
    r#"echo "Game Result: Game 1 ended in 1200 ms. Ai(1)-$5-$GAME_ID has won!""#;

#[test]
fn test_benchmark_command_creates_output_files() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempdir()?;
    let temp_path = temp_dir.path();
    let output_dir = temp_path.join("out");
    let simulator = fake_simulator(temp_path, SEAT_ONE_WINS)?;

    let mut cmd = cargo_bin_cmd!("forge-bench");

    cmd.current_dir(temp_path)
        .arg("benchmark")
        .arg("atraxa.dck")
        .arg("edgar.dck")
        .arg("--simulator-path")
        .arg(&simulator)
        .arg("--repetitions")
        .arg("2")
        .arg("--max-workers")
        .arg("2")
        .arg("--output")
        .arg(&output_dir);

    let output = cmd.output()?;
    assert!(
        output.status.success(),
        "Command should succeed. Stdout: {} Stderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    for file in [
        "benchmark_results.json",
        "results.csv",
        "results.md",
        "deck1_ai_vs_deck2_ai.log",
        "deck2_ai_vs_deck1_ai.log",
    ] {
        assert!(
            output_dir.join(file).exists(),
            "{file} should have been created in the output directory"
        );
    }

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("benchmark_results.json"))?)?;
    assert_eq!(json["summary"]["total_games"], 4);
    assert_eq!(json["summary"]["deck1_wins"], 2);
    assert_eq!(json["summary"]["deck2_wins"], 2);
    assert_eq!(json["summary"]["jobs_failed"], 0);

    // The job id reaches the simulator and ends up in the winner's name
    let log = std::fs::read_to_string(output_dir.join("deck1_ai_vs_deck2_ai.log"))?;
    assert!(log.contains("Ai(1)-atraxa.dck-g1_"));
    assert_eq!(log.matches("=== End ").count(), 2);

    Ok(())
}

#[test]
fn test_failing_simulator_is_reported_not_fatal() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempdir()?;
    let temp_path = temp_dir.path();
    let simulator = fake_simulator(temp_path, "echo 'deck not found' >&2\nexit 3")?;

    let output = cargo_bin_cmd!("forge-bench")
        .current_dir(temp_path)
        .args(["benchmark", "a.dck", "b.dck", "--no-mirror", "--repetitions", "3"])
        .arg("--simulator-path")
        .arg(&simulator)
        .arg("--output")
        .arg(temp_path)
        .output()?;

    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(temp_path.join("benchmark_results.json"))?)?;
    assert_eq!(json["summary"]["total_games"], 0);
    assert_eq!(json["summary"]["jobs_attempted"], 3);
    assert_eq!(json["summary"]["jobs_failed"], 3);
    assert_eq!(
        json["configurations"]["Deck1(AI) vs Deck2(AI)"]["failures"]["process-non-zero-exit"],
        3
    );

    Ok(())
}

#[test]
fn test_stalled_configuration_still_writes_earlier_results() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempdir()?;
    let temp_path = temp_dir.path();
    let output_dir = temp_path.join("out");
    // Games never end once edgar.dck sits in seat 1
    let simulator = fake_simulator(
        temp_path,
        &format!("if [ \"$5\" = \"edgar.dck\" ]; then exec sleep 30; fi\n{SEAT_ONE_WINS}"),
    )?;

    let output = cargo_bin_cmd!("forge-bench")
        .current_dir(temp_path)
        .args(["benchmark", "atraxa.dck", "edgar.dck", "--repetitions", "2"])
        .args(["--max-workers", "2", "--batch-timeout", "1"])
        .arg("--simulator-path")
        .arg(&simulator)
        .arg("--output")
        .arg(&output_dir)
        .output()?;

    assert!(!output.status.success());
    let logs = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(logs.contains("was cancelled by the batch timeout"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("benchmark_results.json"))?)?;
    assert_eq!(json["summary"]["total_games"], 2);
    assert_eq!(json["summary"]["deck1_wins"], 2);
    assert_eq!(
        json["configurations"]["Deck2(AI) vs Deck1(AI)"]["failures"]["cancelled"],
        2
    );
    assert!(output_dir.join("results.csv").exists());
    assert!(output_dir.join("results.md").exists());

    Ok(())
}

#[test]
fn test_missing_simulator_is_fatal() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempdir()?;

    let output = cargo_bin_cmd!("forge-bench")
        .current_dir(temp_dir.path())
        .args(["benchmark", "a.dck", "b.dck"])
        .arg("--simulator-path")
        .arg(temp_dir.path().join("missing.jar"))
        .output()?;

    assert!(!output.status.success());
    let logs = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(logs.contains("Forge simulator not found at provided path"));

    Ok(())
}

#[test]
fn test_check_command_runs() -> Result<(), Box<dyn Error>> {
    let output = cargo_bin_cmd!("forge-bench").arg("check").output()?;
    assert!(output.status.success());
    Ok(())
}
