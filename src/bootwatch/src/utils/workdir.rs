use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::constants::{DIAGNOSTICS_LOG_FILE, PERFORMANCE_LOG_FILE, WORKER_STDERR_FILE};

/// Layout of the logs directory.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDir {
    pub path: PathBuf,
    pub performance_log: PathBuf,
    pub diagnostics_log: PathBuf,
    pub worker_stderr: PathBuf,
}

impl LogDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            performance_log: path.join(PERFORMANCE_LOG_FILE),
            diagnostics_log: path.join(DIAGNOSTICS_LOG_FILE),
            worker_stderr: path.join(WORKER_STDERR_FILE),
            path,
        }
    }

    pub fn init(&self) -> Result<()> {
        ensure_dir(&self.path)
    }

    /// Removes the current run's files; rotated archives are kept.
    pub fn cleanup_run(&self) -> Result<()> {
        [
            &self.performance_log,
            &self.diagnostics_log,
            &self.worker_stderr,
        ]
        .iter()
        .try_for_each(|path| {
            if path.exists() {
                std::fs::remove_file(path)
            } else {
                Ok(())
            }
        })
        .with_context(|| format!("Failed to clean {}", self.path.display()))
    }

    pub fn resolve(&self, rel_path: &str) -> PathBuf {
        self.path.join(rel_path)
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create logs directory: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let dir = LogDir::new("/var/log/bootwatch");
        assert_eq!(dir.performance_log, PathBuf::from("/var/log/bootwatch/performance.jsonl"));
        assert_eq!(dir.diagnostics_log, PathBuf::from("/var/log/bootwatch/bootwatch.log"));
        assert_eq!(dir.resolve("x.txt"), PathBuf::from("/var/log/bootwatch/x.txt"));
    }

    #[test]
    fn test_init_and_cleanup() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = LogDir::new(temp_dir.path().join("a").join("logs"));

        dir.init()?;
        dir.init()?;
        std::fs::write(&dir.performance_log, "{}\n")?;
        std::fs::write(dir.resolve("performance-20250101T000000.000.jsonl"), "{}\n")?;

        dir.cleanup_run()?;
        assert!(!dir.performance_log.exists());
        assert!(dir.resolve("performance-20250101T000000.000.jsonl").exists());
        Ok(())
    }
}
