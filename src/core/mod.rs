pub mod config;
pub mod error;
pub mod output;
pub mod platform;
pub mod resources;
pub mod simulator;
pub mod utils;

pub use config::{BenchmarkConfig, Controller, GlobalConfig};
pub use error::{BenchmarkError, BenchmarkErrorKind, Result};
pub use simulator::SimulatorExecutor;
pub use utils::{format_duration, is_executable};
