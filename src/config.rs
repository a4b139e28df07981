use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;
pub const DATABASE_FILE: &str = "images.db";

/// Settings shared by scan and search. Worker count is fixed configuration,
/// never derived from the machine's core count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub workers: usize,
    /// Confirmation threshold for searches that do not set their own.
    pub default_threshold: f64,
    /// Debug progress is logged every this many items.
    pub progress_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            default_threshold: DEFAULT_THRESHOLD,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            log::warn!(
                "Worker count 0 is invalid, using default ({})",
                DEFAULT_WORKERS
            );
            DEFAULT_WORKERS
        } else {
            self.workers
        }
    }

    /// A dedicated pool so that engine work never lands on rayon's global
    /// pool and the worker count is exactly what was configured.
    pub fn build_pool(&self) -> Result<ThreadPool, ThreadPoolBuildError> {
        ThreadPoolBuilder::new()
            .num_threads(self.effective_workers())
            .thread_name(|i| format!("imagefinder-worker-{}", i))
            .build()
    }
}

/// Accepts a threshold in `[0, 1]`; anything else yields the default and a
/// warning message for the caller to surface.
pub fn validate_threshold(value: f64) -> (f64, Option<String>) {
    if (0.0..=1.0).contains(&value) {
        (value, None)
    } else {
        (DEFAULT_THRESHOLD, Some(invalid_threshold_message(&value.to_string())))
    }
}

pub fn parse_threshold(input: &str) -> (f64, Option<String>) {
    match input.trim().parse::<f64>() {
        Ok(value) if (0.0..=1.0).contains(&value) => (value, None),
        _ => (DEFAULT_THRESHOLD, Some(invalid_threshold_message(input))),
    }
}

fn invalid_threshold_message(input: &str) -> String {
    format!(
        "Invalid threshold value '{}', using default ({})",
        input, DEFAULT_THRESHOLD
    )
}

/// `images.db` next to the running executable, or in the working directory
/// when the executable's location is unknown.
pub fn default_database_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DATABASE_FILE)))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("0.85"), (0.85, None));
        assert_eq!(parse_threshold("1"), (1.0, None));
        assert_eq!(parse_threshold("0"), (0.0, None));

        let (value, warning) = parse_threshold("1.01");
        assert_eq!(value, DEFAULT_THRESHOLD);
        assert_eq!(
            warning.as_deref(),
            Some("Invalid threshold value '1.01', using default (0.8)")
        );

        for bad in ["abc", "", "-0.1", "NaN"] {
            let (value, warning) = parse_threshold(bad);
            assert_eq!(value, DEFAULT_THRESHOLD);
            assert!(warning.is_some(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_validate_threshold() {
        assert_eq!(validate_threshold(0.5), (0.5, None));
        assert_eq!(validate_threshold(f64::NAN).0, DEFAULT_THRESHOLD);
        assert!(validate_threshold(2.0).1.is_some());
    }

    #[test]
    fn test_pool_uses_configured_workers() {
        let pool = EngineConfig::default().with_workers(3).build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 3);

        let pool = EngineConfig::default().with_workers(0).build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), DEFAULT_WORKERS);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert_eq!(path.file_name().unwrap(), DATABASE_FILE);
    }
}
