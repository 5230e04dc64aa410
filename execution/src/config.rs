// Worker Configuration

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => raw.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    /// Seconds a received message stays invisible to other consumers.
    pub visibility_timeout: u64,
    pub max_attempts: u32,
    pub base_backoff_seconds: f64,
    pub max_backoff_seconds: f64,
    /// Window applied when a message names no analysis dates.
    pub default_lookback_days: i64,
    pub confidence_threshold: f64,
    /// Persist run results and status records after processing.
    pub save_results: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "analysis-requests".to_string(),
            dead_letter_queue_name: "analysis-requests-deadletter".to_string(),
            visibility_timeout: 300,
            max_attempts: 5,
            base_backoff_seconds: 2.0,
            max_backoff_seconds: 30.0,
            default_lookback_days: 30,
            confidence_threshold: 60.0,
            save_results: false,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let queue_name = std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name);
        let dead_letter_queue_name = std::env::var("QUEUE_DEAD_LETTER_NAME")
            .unwrap_or_else(|_| format!("{queue_name}-deadletter"));

        Self {
            dead_letter_queue_name,
            visibility_timeout: env_or("QUEUE_VISIBILITY_TIMEOUT", defaults.visibility_timeout),
            max_attempts: env_or("QUEUE_MAX_ATTEMPTS", defaults.max_attempts),
            base_backoff_seconds: env_or("QUEUE_BACKOFF_SECONDS", defaults.base_backoff_seconds),
            max_backoff_seconds: env_or("QUEUE_BACKOFF_MAX_SECONDS", defaults.max_backoff_seconds),
            default_lookback_days: env_or(
                "QUEUE_DEFAULT_LOOKBACK_DAYS",
                defaults.default_lookback_days,
            ),
            confidence_threshold: env_or(
                "CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            save_results: env_flag("SAVE_RESULTS", defaults.save_results),
            queue_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_queue_contract() {
        let config = WorkerConfig::default();
        assert_eq!(config.visibility_timeout, 300);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff_seconds, 2.0);
        assert_eq!(config.max_backoff_seconds, 30.0);
        assert_eq!(config.default_lookback_days, 30);
        assert!(!config.save_results);
    }
}
