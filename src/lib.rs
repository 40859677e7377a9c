pub mod benchmark;
pub mod core;

pub use benchmark::aggregate::BenchmarkSummary;
pub use core::error::{BenchmarkError, BenchmarkErrorKind, Result};
pub use core::{BenchmarkConfig, GlobalConfig};
