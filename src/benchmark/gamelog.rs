//! Raw simulator output, kept per configuration for later inspection.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::core::{Result, utils::slugify};

#[derive(Debug, Clone)]
pub struct GameLog {
    dir: PathBuf,
}

impl GameLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<configuration slug>.log`
    pub fn path_for(&self, configuration: &str) -> PathBuf {
        self.dir.join(format!("{}.log", slugify(configuration)))
    }

    /// Append one job's output, framed by `=== label ===` markers
    pub fn append(&self, configuration: &str, label: &str, output: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(configuration);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        write!(file, "\n=== {label} ===\n{output}")?;
        if !output.ends_with('\n') {
            writeln!(file)?;
        }
        write!(file, "=== End {label} ===\n\n")?;

        tracing::debug!("Appended output of {label} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_frames_each_job() {
        let dir = TempDir::new().unwrap();
        let log = GameLog::new(dir.path().join("logs"));

        log.append("Deck1(AI) vs Deck2(LLM)", "job_1", "first\n")
            .unwrap();
        log.append("Deck1(AI) vs Deck2(LLM)", "job_2", "second")
            .unwrap();

        let path = dir.path().join("logs").join("deck1_ai_vs_deck2_llm.log");
        let content = fs::read_to_string(path).unwrap();

        assert_eq!(
            content,
            "\n=== job_1 ===\nfirst\n=== End job_1 ===\n\n\n=== job_2 ===\nsecond\n=== End job_2 ===\n\n"
        );
    }
}
