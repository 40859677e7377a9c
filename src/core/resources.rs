//! Host resource snapshot, lingering simulator process detection and
//! decision service reachability.

use std::{fmt, time::Duration};

use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::net::TcpStream;

/// Process names that indicate a running simulator
const SIMULATOR_PROCESS_NAMES: &[&str] = &["java", "forge"];

/// How long a decision service connection attempt may take
pub const SERVICE_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct SimulatorProcess {
    pub pid: u32,
    pub name: String,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub used_memory_mb: u64,
    pub total_memory_mb: u64,
    pub cpu_usage: f32,
    pub total_processes: usize,
    pub simulator_processes: Vec<SimulatorProcess>,
}

impl ResourceSnapshot {
    pub fn memory_percent(&self) -> f64 {
        if self.total_memory_mb == 0 {
            0.0
        } else {
            self.used_memory_mb as f64 / self.total_memory_mb as f64 * 100.0
        }
    }

    pub fn log(&self) {
        tracing::info!(
            "Memory: {:.1}% used ({} MB / {} MB), CPU: {:.1}%, processes: {}",
            self.memory_percent(),
            self.used_memory_mb,
            self.total_memory_mb,
            self.cpu_usage,
            self.total_processes
        );
        if self.simulator_processes.is_empty() {
            tracing::info!("No simulator processes running");
        }
        for process in &self.simulator_processes {
            tracing::info!(
                "  PID {} ({}): {} MB RAM",
                process.pid,
                process.name,
                process.memory_mb
            );
        }
    }
}

/// Take a snapshot of memory, CPU and simulator-looking processes
pub fn snapshot() -> ResourceSnapshot {
    let mut sys = System::new_all();
    // CPU usage needs two refreshes some time apart
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let simulator_processes = sys
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let name = process.name().to_string_lossy().to_string();
            let lower = name.to_ascii_lowercase();
            SIMULATOR_PROCESS_NAMES
                .iter()
                .any(|candidate| lower.contains(candidate))
                .then(|| SimulatorProcess {
                    pid: pid.as_u32(),
                    name,
                    memory_mb: process.memory() / 1024 / 1024,
                })
        })
        .collect();

    ResourceSnapshot {
        used_memory_mb: sys.used_memory() / 1024 / 1024,
        total_memory_mb: sys.total_memory() / 1024 / 1024,
        cpu_usage: sys.global_cpu_usage(),
        total_processes: sys.processes().len(),
        simulator_processes,
    }
}

/// [`snapshot`] on the blocking pool, so async callers keep their worker thread
pub async fn current() -> Result<ResourceSnapshot, tokio::task::JoinError> {
    tokio::task::spawn_blocking(snapshot).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    Reachable,
    Unreachable { reason: String },
    InvalidEndpoint,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Reachable => write!(f, "reachable"),
            ServiceStatus::Unreachable { reason } => write!(f, "unreachable ({reason})"),
            ServiceStatus::InvalidEndpoint => write!(f, "not a valid endpoint"),
        }
    }
}

/// `host:port` of an `http(s)://host[:port][/path]` endpoint
pub fn endpoint_address(endpoint: &str) -> Option<String> {
    let (rest, default_port) = match endpoint.split_once("://") {
        Some(("https", rest)) => (rest, 443),
        Some(("http", rest)) => (rest, 80),
        Some(_) => return None,
        None => (endpoint, 80),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Some(authority.to_string())
        }
        Some(_) => None,
        None => Some(format!("{authority}:{default_port}")),
    }
}

/// Try to open a TCP connection to the decision service
pub async fn check_service(endpoint: &str, timeout: Duration) -> ServiceStatus {
    let Some(address) = endpoint_address(endpoint) else {
        return ServiceStatus::InvalidEndpoint;
    };

    match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(_)) => ServiceStatus::Reachable,
        Ok(Err(e)) => ServiceStatus::Unreachable {
            reason: e.to_string(),
        },
        Err(_) => ServiceStatus::Unreachable {
            reason: format!("no answer within {:.0}s", timeout.as_secs_f64()),
        },
    }
}

/// Whether a process with this id still exists and has not exited.
///
/// Zombies count as gone: they no longer run, and are only waiting to be reaped.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    sys.process(pid)
        .is_some_and(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn `true`");
        let pid = child.id();
        child.wait().expect("wait for `true`");

        assert!(!is_process_alive(pid));
    }

    #[test]
    fn test_memory_percent_handles_zero_total() {
        let snapshot = ResourceSnapshot {
            used_memory_mb: 10,
            total_memory_mb: 0,
            cpu_usage: 0.0,
            total_processes: 0,
            simulator_processes: Vec::new(),
        };
        assert_eq!(snapshot.memory_percent(), 0.0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_snapshot_leaves_the_runtime_free() {
        let start = std::time::Instant::now();
        let (snapshot, ticked_after) = tokio::join!(current(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            start.elapsed()
        });

        assert!(snapshot.unwrap().total_processes > 0);
        assert!(
            ticked_after < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
            "timer was held up for {ticked_after:?}"
        );
    }

    #[test]
    fn test_endpoint_address() {
        assert_eq!(
            endpoint_address("http://localhost:7861").as_deref(),
            Some("localhost:7861")
        );
        assert_eq!(
            endpoint_address("https://llm.example.org/v1/decide").as_deref(),
            Some("llm.example.org:443")
        );
        assert_eq!(endpoint_address("127.0.0.1:9000").as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(endpoint_address("ftp://host:21"), None);
        assert_eq!(endpoint_address("http://host:port"), None);
        assert_eq!(endpoint_address("http://"), None);
    }

    #[tokio::test]
    async fn test_check_service_open_and_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = format!("http://{}", listener.local_addr().unwrap());
        assert_eq!(
            check_service(&open, Duration::from_secs(2)).await,
            ServiceStatus::Reachable
        );

        drop(listener);
        assert!(matches!(
            check_service(&open, Duration::from_secs(2)).await,
            ServiceStatus::Unreachable { .. }
        ));
        assert_eq!(
            check_service("gopher://x", Duration::from_secs(2)).await,
            ServiceStatus::InvalidEndpoint
        );
    }
}
