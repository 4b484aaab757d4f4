use anyhow::Result;

use crate::config::Config;
use crate::info_message;

pub fn info(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    if config.config_sources.is_empty() {
        info_message!("Using built-in defaults");
    } else {
        info_message!("Loaded from: {}", config.config_sources.join(", "));
    }
    println!("  readiness_timeout_ms      {}", config.readiness_timeout_ms);
    println!("  health_check_interval_ms  {}", config.health_check_interval_ms);
    println!("  max_restart_attempts      {}", config.max_restart_attempts);
    println!("  backoff_base_ms           {}", config.backoff_base_ms);
    println!("  log_rotation_size_bytes   {}", config.log_rotation_size_bytes);
    println!("  log_dir                   {}", config.log_dir.display());

    let registry = config.threshold_registry()?;
    println!("Thresholds (warn / critical):");
    for category in crate::instrumentation::Category::ALL {
        let threshold = registry.threshold_for(category);
        println!(
            "  {:<12} {:>7}ms / {:>7}ms",
            category.as_str(),
            threshold.warn_at.as_millis(),
            threshold.critical_at.as_millis()
        );
    }
    Ok(())
}
