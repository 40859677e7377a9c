//! Batch timeout against real processes: the pool gives up on time and
//! leaves nothing running behind.

#![cfg(unix)]

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use forge_bench::{
    benchmark::{
        job::{JobFailure, JobSpec},
        pool::{PoolConfig, WorkerPool},
        process::ProcessRunner,
    },
    core::{
        Controller, SimulatorExecutor, resources::is_process_alive,
        simulator::SimulatorSettings,
    },
};
use tempfile::TempDir;

fn slow_simulator(dir: &TempDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("slow-sim");
    std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_timeout_cancels_and_terminates() {
    let dir = TempDir::new().unwrap();
    let simulator = SimulatorExecutor::new(
        slow_simulator(&dir),
        PathBuf::from("java"),
        SimulatorSettings::default(),
    );
    let runner = ProcessRunner::new(simulator).with_grace_period(Duration::from_millis(500));

    let pool = WorkerPool::new(
        runner,
        PoolConfig {
            max_workers: 2,
            job_timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(1),
            retrieval_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        },
    )
    .unwrap();

    let jobs: Vec<JobSpec> = (1..=5)
        .map(|i| JobSpec::new("slow", i, ["a.dck", "b.dck"], [Controller::Ai, Controller::Ai], 1))
        .collect();

    let start = Instant::now();
    let report = pool.run_all(jobs).await.unwrap();

    assert!(
        start.elapsed() < Duration::from_secs(10),
        "pool should return soon after the batch timeout, took {:?}",
        start.elapsed()
    );
    assert!(report.batch_timed_out);
    assert_eq!(report.attempted(), 5);
    assert_eq!(report.cancelled(), 5);
    assert!(
        report
            .results
            .iter()
            .all(|(_, result)| result.failure_reason() == Some(&JobFailure::Cancelled))
    );

    let started: Vec<u32> = report.results.iter().filter_map(|(_, r)| r.pid).collect();
    assert_eq!(started.len(), 2, "only the two running jobs had a process");
    for pid in started {
        assert!(!is_process_alive(pid), "process {pid} survived its cancelled job");
    }
}
