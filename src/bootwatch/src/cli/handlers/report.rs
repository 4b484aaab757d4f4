use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;
use crate::logger::{read_log, Severity};
use crate::{success_message, warning_message};

pub fn report(config: &Config, log: Option<PathBuf>) -> Result<()> {
    let path = log.unwrap_or_else(|| config.logger_config().log_path());
    let summary = read_log(&path)?;

    print!("{summary}");
    match summary.count(Severity::Bottleneck) {
        0 => success_message!("No critical bottlenecks in {}", path.display()),
        n => warning_message!("{} critical bottleneck(s) in {}", n, path.display()),
    }
    Ok(())
}
