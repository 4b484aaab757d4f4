//! Expected-duration budgets per operation category.
//!
//! The registry is built once from configuration and only read afterwards,
//! so it is shared as `Arc<ThresholdRegistry>` without locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_GENERIC_CRITICAL_MS, DEFAULT_GENERIC_WARN_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Environment,
    Settings,
    Webview,
    Subprocess,
    Startup,
    Generic,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Environment,
        Category::Settings,
        Category::Webview,
        Category::Subprocess,
        Category::Startup,
        Category::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Environment => "ENVIRONMENT",
            Category::Settings => "SETTINGS",
            Category::Webview => "WEBVIEW",
            Category::Subprocess => "SUBPROCESS",
            Category::Startup => "STARTUP",
            Category::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Result of comparing a duration with its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Classification {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub category: Category,
    pub warn_at: Duration,
    pub critical_at: Duration,
}

impl Threshold {
    pub fn from_millis(category: Category, warn_ms: u64, critical_ms: u64) -> Self {
        Self {
            category,
            warn_at: Duration::from_millis(warn_ms),
            critical_at: Duration::from_millis(critical_ms),
        }
    }

    pub fn classify(&self, duration: Duration) -> Classification {
        if duration >= self.critical_at {
            Classification::Critical
        } else if duration > self.warn_at {
            Classification::Warn
        } else {
            Classification::Ok
        }
    }

    /// Percentage by which `duration` exceeds the warn budget, 0 when within it.
    pub fn overrun_pct(&self, duration: Duration) -> f64 {
        let budget = self.warn_at.as_secs_f64();
        if budget <= 0.0 || duration <= self.warn_at {
            return 0.0;
        }
        ((duration.as_secs_f64() - budget) / budget * 100.0 * 10.0).round() / 10.0
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdRegistry {
    by_category: HashMap<Category, Threshold>,
    // Keys ending in '_' match by prefix, others exactly.
    by_operation: Vec<(String, Threshold)>,
}

impl Default for ThresholdRegistry {
    fn default() -> Self {
        let defaults = [
            Threshold::from_millis(Category::Environment, 2_000, 5_000),
            Threshold::from_millis(Category::Settings, 2_000, 4_000),
            Threshold::from_millis(Category::Webview, 10_000, 20_000),
            Threshold::from_millis(Category::Subprocess, 20_000, 30_000),
            Threshold::from_millis(Category::Startup, 30_000, 60_000),
            Threshold::from_millis(
                Category::Generic,
                DEFAULT_GENERIC_WARN_MS,
                DEFAULT_GENERIC_CRITICAL_MS,
            ),
        ];
        Self {
            by_category: defaults.into_iter().map(|t| (t.category, t)).collect(),
            by_operation: Vec::new(),
        }
    }
}

impl ThresholdRegistry {
    /// A registry with no entries; every lookup resolves to the built-in generic budget.
    pub fn empty() -> Self {
        Self {
            by_category: HashMap::new(),
            by_operation: Vec::new(),
        }
    }

    pub fn with_category(mut self, threshold: Threshold) -> Self {
        self.by_category.insert(threshold.category, threshold);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>, threshold: Threshold) -> Self {
        let operation = operation.into();
        self.by_operation.retain(|(key, _)| *key != operation);
        self.by_operation.push((operation, threshold));
        self
    }

    /// Budget for a category, falling back to GENERIC.
    pub fn threshold_for(&self, category: Category) -> Threshold {
        self.by_category
            .get(&category)
            .or_else(|| self.by_category.get(&Category::Generic))
            .copied()
            .unwrap_or_else(|| {
                Threshold::from_millis(
                    Category::Generic,
                    DEFAULT_GENERIC_WARN_MS,
                    DEFAULT_GENERIC_CRITICAL_MS,
                )
            })
    }

    /// Budget for a named operation: exact name, then longest matching
    /// `prefix_` key, then the category budget.
    pub fn threshold_for_span(&self, name: &str, category: Category) -> Threshold {
        if let Some((_, threshold)) = self.by_operation.iter().find(|(key, _)| key == name) {
            return *threshold;
        }

        self.by_operation
            .iter()
            .filter(|(key, _)| key.ends_with('_') && name.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, threshold)| *threshold)
            .unwrap_or_else(|| self.threshold_for(category))
    }

    pub fn classify(&self, category: Category, duration: Duration) -> Classification {
        self.threshold_for(category).classify(duration)
    }

    pub fn classify_span(&self, name: &str, category: Category, duration: Duration) -> Classification {
        self.threshold_for_span(name, category).classify(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Category::Settings, 600, Classification::Ok)]
    #[case(Category::Settings, 2_500, Classification::Warn)]
    #[case(Category::Settings, 4_000, Classification::Critical)]
    #[case(Category::Webview, 10_000, Classification::Ok)]
    #[case(Category::Webview, 12_000, Classification::Warn)]
    #[case(Category::Subprocess, 25_000, Classification::Warn)]
    #[case(Category::Subprocess, 30_000, Classification::Critical)]
    #[case(Category::Startup, 29_000, Classification::Ok)]
    fn test_default_budgets(
        #[case] category: Category,
        #[case] millis: u64,
        #[case] expected: Classification,
    ) {
        let registry = ThresholdRegistry::default();
        assert_eq!(
            registry.classify(category, Duration::from_millis(millis)),
            expected
        );
    }

    #[test]
    fn test_missing_category_falls_back_to_generic() {
        let registry = ThresholdRegistry::empty()
            .with_category(Threshold::from_millis(Category::Generic, 100, 200));

        assert_eq!(
            registry.threshold_for(Category::Webview).category,
            Category::Generic
        );
        assert_eq!(
            registry.classify(Category::Webview, Duration::from_millis(150)),
            Classification::Warn
        );
    }

    #[test]
    fn test_empty_registry_uses_builtin_generic() {
        let registry = ThresholdRegistry::empty();
        let threshold = registry.threshold_for(Category::Settings);
        assert_eq!(threshold.warn_at, Duration::from_millis(DEFAULT_GENERIC_WARN_MS));
    }

    #[test]
    fn test_operation_overrides() {
        let registry = ThresholdRegistry::default()
            .with_operation(
                "wait_for_ready_message",
                Threshold::from_millis(Category::Subprocess, 10_000, 20_000),
            )
            .with_operation("setup_", Threshold::from_millis(Category::Generic, 1_000, 2_000))
            .with_operation(
                "setup_version_",
                Threshold::from_millis(Category::Generic, 500, 1_000),
            );

        assert_eq!(
            registry
                .threshold_for_span("wait_for_ready_message", Category::Generic)
                .warn_at,
            Duration::from_secs(10)
        );
        assert_eq!(
            registry
                .threshold_for_span("setup_python_paths", Category::Environment)
                .warn_at,
            Duration::from_secs(1)
        );
        assert_eq!(
            registry
                .threshold_for_span("setup_version_file", Category::Environment)
                .warn_at,
            Duration::from_millis(500)
        );
        assert_eq!(
            registry
                .threshold_for_span("load_settings", Category::Settings)
                .category,
            Category::Settings
        );
    }

    #[test]
    fn test_overrun_pct() {
        let threshold = Threshold::from_millis(Category::Generic, 2_000, 4_000);
        assert_eq!(threshold.overrun_pct(Duration::from_millis(1_000)), 0.0);
        assert_eq!(threshold.overrun_pct(Duration::from_millis(3_000)), 50.0);
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("subprocess".parse::<Category>(), Ok(Category::Subprocess));
        assert!("gpu".parse::<Category>().is_err());
    }
}
