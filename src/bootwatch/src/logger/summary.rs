//! Offline analysis of a performance log.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::entry::{LogEntry, Severity, SpanSnapshot};

#[derive(Debug, Default)]
pub struct LogSummary {
    pub entries: usize,
    pub skipped_lines: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Closed spans, slowest first.
    pub slowest: Vec<SpanSnapshot>,
    pub bottlenecks: Vec<LogEntry>,
}

impl LogSummary {
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let mut summary = LogSummary::default();
        for entry in entries {
            summary.entries += 1;
            *summary.by_severity.entry(entry.severity).or_default() += 1;
            if let Some(span) = &entry.span {
                summary.slowest.push(span.clone());
            }
            if entry.severity != Severity::Info && entry.span.is_some() {
                summary.bottlenecks.push(entry);
            }
        }
        summary
            .slowest
            .sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        summary
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Parses a JSON-lines log, returning the entries and the number of lines
/// that could not be parsed.
pub fn read_entries(path: &Path) -> Result<(Vec<LogEntry>, usize)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read performance log {}", path.display()))?;

    let mut skipped = 0;
    let entries = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => Some(entry),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    Ok((entries, skipped))
}

/// The current log plus its rotated archives, oldest archive first.
pub fn log_files(path: &Path) -> Result<Vec<PathBuf>> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut archives: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&format!("{stem}-")))
                .unwrap_or(false)
        })
        .collect();
    archives.sort_by_cached_key(|p| archive_order(&stem, p));

    if path.exists() {
        archives.push(path.to_path_buf());
    }
    Ok(archives)
}

// Archives are `{stem}-{stamp}.ext`, or `{stem}-{stamp}-{n}.ext` when several
// rotations share a millisecond.
fn archive_order(stem: &str, path: &Path) -> (String, u32) {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rest = name.strip_prefix(&format!("{stem}-")).unwrap_or(&name);
    match rest.split_once('-') {
        Some((stamp, counter)) => (stamp.to_string(), counter.parse().unwrap_or(0)),
        None => (rest.to_string(), 0),
    }
}

pub fn read_log(path: &Path) -> Result<LogSummary> {
    let mut all = Vec::new();
    let mut skipped = 0;
    for file in log_files(path)? {
        let (entries, bad) = read_entries(&file)?;
        all.extend(entries);
        skipped += bad;
    }
    all.sort_by_key(|entry| (entry.timestamp, entry.seq));

    let mut summary = LogSummary::from_entries(all);
    summary.skipped_lines = skipped;
    Ok(summary)
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} entries ({} INFO, {} WARN, {} BOTTLENECK, {} unreadable lines)",
            self.entries,
            self.count(Severity::Info),
            self.count(Severity::Warn),
            self.count(Severity::Bottleneck),
            self.skipped_lines
        )?;

        writeln!(f, "Slowest spans:")?;
        for span in self.slowest.iter().take(10) {
            writeln!(
                f,
                "  {:>10.1}ms  {:<11} {} ({})",
                span.duration_ms, span.category, span.name, span.outcome
            )?;
        }

        if !self.bottlenecks.is_empty() {
            writeln!(f, "Bottlenecks:")?;
            for entry in &self.bottlenecks {
                writeln!(f, "  [{}] {}", entry.severity, entry.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::{Category, Metadata, Outcome};
    use chrono::Utc;
    use std::io::Write;
    use tempfile::TempDir;

    fn span_entry(seq: u64, name: &str, duration_ms: f64, severity: Severity) -> LogEntry {
        LogEntry {
            seq,
            timestamp: Utc::now(),
            elapsed_ms: 0.0,
            severity,
            message: format!("Completed {name}"),
            span: Some(SpanSnapshot {
                id: seq,
                parent_id: None,
                name: name.to_string(),
                category: Category::Generic,
                started_at: Utc::now(),
                duration_ms,
                outcome: Outcome::Success,
                metadata: Metadata::new(),
            }),
            fields: Metadata::new(),
        }
    }

    #[test]
    fn test_summary_orders_and_counts() {
        let summary = LogSummary::from_entries(vec![
            span_entry(1, "settings_load", 600.0, Severity::Info),
            span_entry(2, "worker_readiness", 25_000.0, Severity::Bottleneck),
            span_entry(3, "ui_panel_load", 12_000.0, Severity::Warn),
        ]);

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.slowest[0].name, "worker_readiness");
        assert_eq!(summary.slowest[2].name, "settings_load");
        assert_eq!(summary.bottlenecks.len(), 2);
        assert_eq!(summary.count(Severity::Bottleneck), 1);
    }

    #[test]
    fn test_read_log_includes_archives_and_skips_garbage() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let current = temp_dir.path().join("performance.jsonl");
        let archive = temp_dir.path().join("performance-20250101T000000.000.jsonl");

        let mut file = fs::File::create(&archive)?;
        file.write_all(&span_entry(1, "environment_setup", 5.0, Severity::Info).to_json_line()?)?;
        let mut file = fs::File::create(&current)?;
        file.write_all(&span_entry(2, "settings_load", 7.0, Severity::Info).to_json_line()?)?;
        file.write_all(b"not json\n")?;

        let summary = read_log(&current)?;
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.skipped_lines, 1);
        Ok(())
    }

    #[test]
    fn test_log_files_put_same_millisecond_archives_in_rotation_order() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let current = temp_dir.path().join("performance.jsonl");
        for name in [
            "performance-20250101T000000.001.jsonl",
            "performance-20250101T000000.000-2.jsonl",
            "performance-20250101T000000.000-1.jsonl",
            "performance-20250101T000000.000.jsonl",
            "performance.jsonl",
        ] {
            fs::File::create(temp_dir.path().join(name))?;
        }

        let names: Vec<String> = log_files(&current)?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![
                "performance-20250101T000000.000.jsonl",
                "performance-20250101T000000.000-1.jsonl",
                "performance-20250101T000000.000-2.jsonl",
                "performance-20250101T000000.001.jsonl",
                "performance.jsonl",
            ]
        );
        Ok(())
    }
}
