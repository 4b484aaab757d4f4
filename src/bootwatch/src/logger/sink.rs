//! Durable and in-memory destinations for performance log lines.

use chrono::Utc;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::entry::LogEntry;

/// Destination for serialized log lines.
///
/// Callers hold the logger's lock while calling into a sink, so a sink sees
/// whole records one at a time.
pub trait EntrySink: Send {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn describe(&self) -> String;
}

/// Append-only JSON-lines file, rotated to a timestamped archive when it
/// grows past `rotation_size`.
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
    rotation_size: u64,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>, rotation_size: u64) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            written,
            rotation_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn archive_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "performance".to_string());
        let extension = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jsonl".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");

        let mut candidate = self.path.with_file_name(format!("{stem}-{stamp}.{extension}"));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self
                .path
                .with_file_name(format!("{stem}-{stamp}-{counter}.{extension}"));
            counter += 1;
        }
        candidate
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let archive = self.archive_path();
        fs::rename(&self.path, &archive)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        info!("Rotated performance log to {}", archive.display());
        Ok(())
    }
}

impl EntrySink for FileSink {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.written > 0 && self.written + line.len() as u64 > self.rotation_size {
            self.rotate()?;
        }
        self.file.write_all(line)?;
        self.written += line.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Bounded ring of entries kept when the durable sink is unusable.
#[derive(Debug)]
pub struct FallbackBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl FallbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
            debug!("Fallback buffer full, dropped oldest entry");
        }
        self.entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::entry::Severity;
    use crate::instrumentation::Metadata;
    use tempfile::TempDir;

    fn entry(seq: u64) -> LogEntry {
        LogEntry {
            seq,
            timestamp: Utc::now(),
            elapsed_ms: 0.0,
            severity: Severity::Info,
            message: format!("entry {seq}"),
            span: None,
            fields: Metadata::new(),
        }
    }

    #[test]
    fn test_file_sink_appends_lines() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("logs").join("performance.jsonl");

        let mut sink = FileSink::open(&path, 1024 * 1024)?;
        sink.write_line(b"{\"a\":1}\n")?;
        sink.write_line(b"{\"a\":2}\n")?;
        sink.flush()?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_rotation_keeps_every_line() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("performance.jsonl");
        let line = b"{\"payload\":\"0123456789\"}\n";

        let mut sink = FileSink::open(&path, (line.len() * 3) as u64)?;
        for _ in 0..10 {
            sink.write_line(line)?;
        }
        sink.flush()?;

        let mut total = 0;
        let mut files = 0;
        for dir_entry in fs::read_dir(temp_dir.path())? {
            let content = fs::read_to_string(dir_entry?.path())?;
            total += content.lines().count();
            files += 1;
        }
        assert_eq!(total, 10);
        assert_eq!(files, 4);
        Ok(())
    }

    #[test]
    fn test_reopen_continues_size_accounting() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("performance.jsonl");
        {
            let mut sink = FileSink::open(&path, 1024)?;
            sink.write_line(b"12345\n")?;
        }
        let sink = FileSink::open(&path, 1024)?;
        assert_eq!(sink.written, 6);
        Ok(())
    }

    #[test]
    fn test_fallback_buffer_drops_oldest() {
        let mut buffer = FallbackBuffer::new(2);
        buffer.push(entry(1));
        buffer.push(entry(2));
        buffer.push(entry(3));

        let seqs: Vec<u64> = buffer.snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(buffer.dropped(), 1);
    }
}
