use std::{fs::File, io::BufWriter, path::Path};

use crate::core::{
    error::Result,
    output::{ResultWriter, WriteData, ensure_output_dir},
};

pub const JSON_FILE_NAME: &str = "benchmark_results.json";

/// `benchmark_results.json`, the summary as it is
pub struct JsonWriter;

impl ResultWriter for JsonWriter {
    fn write(&self, data: &WriteData, path: &Path) -> Result<()> {
        ensure_output_dir(path)?;

        let json_path = path.join(JSON_FILE_NAME);
        let writer = BufWriter::new(File::create(&json_path)?);
        serde_json::to_writer_pretty(writer, data.summary)?;

        tracing::info!("Results written to {}", json_path.display());
        Ok(())
    }
}
