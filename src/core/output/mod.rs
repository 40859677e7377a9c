//! Writing the benchmark summary to disk (JSON, CSV and a Markdown report).

use std::path::Path;

use crate::{Result, benchmark::aggregate::BenchmarkSummary};

pub mod csv;
pub mod json;
pub mod report;
pub use csv::CsvWriter;
pub use json::JsonWriter;
pub use report::ReportWriter;

/// What the writers get to work with
#[derive(Debug, Clone, Copy)]
pub struct WriteData<'a> {
    pub summary: &'a BenchmarkSummary,
    /// Custom Handlebars template for the report
    pub template_path: Option<&'a Path>,
}

pub trait ResultWriter {
    /// Write into the directory `path`
    fn write(&self, data: &WriteData, path: &Path) -> Result<()>;
}

pub fn ensure_output_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Every artifact of a run, into `output_dir`
pub fn write_results(
    summary: &BenchmarkSummary,
    output_dir: &Path,
    template_path: Option<&Path>,
) -> Result<()> {
    ensure_output_dir(output_dir)?;

    let data = WriteData {
        summary,
        template_path,
    };
    let writers: [&dyn ResultWriter; 3] = [&JsonWriter, &CsvWriter, &ReportWriter];

    for writer in writers {
        writer.write(&data, output_dir)?;
    }

    Ok(())
}
