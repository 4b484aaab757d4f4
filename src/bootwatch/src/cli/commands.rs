use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::constants::{CONFIG_FILE, DEFAULT_LOG_DIR, DIAGNOSTICS_LOG_FILE, PERFORMANCE_LOG_FILE};

fn about_message() -> String {
    format!(
        "Startup diagnostics and worker supervision\nVersion: {}",
        env!("CARGO_PKG_VERSION")
    )
}

fn footer_message() -> String {
    format!(
        "Config file: {CONFIG_FILE} (overridable with BOOTWATCH_* variables)\n\
         Performance log: {DEFAULT_LOG_DIR}/{PERFORMANCE_LOG_FILE}\n\
         Diagnostics log: {DEFAULT_LOG_DIR}/{DIAGNOSTICS_LOG_FILE}\n"
    )
}

#[derive(Parser, Clone, Debug)]
#[clap(
    name = "bootwatch",
    about = about_message(),
    version = env!("CARGO_PKG_VERSION"),
    after_help = footer_message()
)]
pub struct Cli {
    /// Path to a TOML config file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Diagnostics log level (overridden by BOOTWATCH_LOG)
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the standard startup sequence around a worker process
    Run(RunArgs),

    /// Summarize a performance log, including rotated archives
    Report {
        /// Log file to read; defaults to the configured performance log
        #[clap(long)]
        log: Option<PathBuf>,
    },

    /// Show the effective configuration
    Info {
        /// Output information in JSON format
        #[clap(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON settings file loaded by the settings stage
    #[clap(long)]
    pub settings: Option<PathBuf>,

    /// Treat the worker as ready after it stays alive this long, instead of
    /// waiting for a `{"status": "success"}` line
    #[clap(long, value_name = "MS")]
    pub liveness_ms: Option<u64>,

    /// Keep the worker supervised until Ctrl-C
    #[clap(long)]
    pub hold: bool,

    /// Print the startup report as JSON
    #[clap(long)]
    pub json: bool,

    /// Worker program and its arguments
    #[clap(required = true, last = true)]
    pub worker: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_worker_after_separator() {
        let cli = Cli::try_parse_from([
            "bootwatch",
            "--log-level",
            "debug",
            "run",
            "--liveness-ms",
            "500",
            "--",
            "python3",
            "worker.py",
            "--port",
            "0",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.liveness_ms, Some(500));
                assert_eq!(args.worker, ["python3", "worker.py", "--port", "0"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_worker() {
        assert!(Cli::try_parse_from(["bootwatch", "run"]).is_err());
    }

    #[test]
    fn test_report_with_global_config() {
        let cli = Cli::try_parse_from([
            "bootwatch",
            "report",
            "--config",
            "custom.toml",
            "--log",
            "logs/performance.jsonl",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Report { log: Some(_) }));
    }
}
