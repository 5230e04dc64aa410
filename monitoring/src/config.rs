// Monitor Configuration
// Everything is environment-driven with the same fallback chains the
// deployment scripts rely on. Defaults keep a bare process useful.

use signal_detection::DetectionConfig;
use tracing::warn;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

/// Runtime settings for all three monitor passes.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub watchlist: Vec<String>,
    pub detection: DetectionConfig,
    /// Minimum combined confidence before a request is enqueued.
    pub min_confidence: f64,
    /// Per-ticker enqueue cooldown for the 5-minute pass.
    pub cooldown_seconds: i64,
    /// Calendar days of daily history named in the analysis window.
    pub analysis_lookback_days: i64,
    /// Calendar days of intraday history fetched for detection.
    pub history_days: i64,
    pub interval: String,
    pub interval_multiplier: u32,
    /// Instant-change trigger for the 1-minute pass (0.005 = 0.5%).
    pub fast_percent_threshold: f64,
    /// Re-detect cooldown for the 1-minute pass.
    pub fast_cooldown_seconds: i64,
    /// Validation scores below this send an exit signal.
    pub validation_exit_threshold: u32,
    pub user_id: String,
    pub strategy_id: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            detection: DetectionConfig::default(),
            min_confidence: 0.70,
            cooldown_seconds: 30 * 60,
            analysis_lookback_days: 180,
            history_days: 180,
            interval: "minute".to_string(),
            interval_multiplier: 5,
            fast_percent_threshold: 0.005,
            fast_cooldown_seconds: 5 * 60,
            validation_exit_threshold: 30,
            user_id: "market-monitor".to_string(),
            strategy_id: "auto-signal".to_string(),
        }
    }
}

fn default_watchlist() -> Vec<String> {
    ["AAPL", "MSFT", "NVDA"].iter().map(|s| s.to_string()).collect()
}

fn parse_watchlist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let watchlist = first_env(&[
            "MARKET_MONITOR_WATCHLIST",
            "WATCHLIST_TICKERS",
            "DEFAULT_WATCHLIST",
        ])
        .map(|raw| parse_watchlist(&raw))
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| {
            let fallback = default_watchlist();
            warn!(?fallback, "no watchlist configured, using default");
            fallback
        });

        Self {
            watchlist,
            detection: DetectionConfig {
                percent_threshold: env_or(
                    "MARKET_MONITOR_PERCENT_CHANGE_THRESHOLD",
                    defaults.detection.percent_threshold,
                ),
                volume_multiplier: env_or(
                    "MARKET_MONITOR_VOLUME_SPIKE_MULTIPLIER",
                    defaults.detection.volume_multiplier,
                ),
                vwap_std_threshold: env_or(
                    "MARKET_MONITOR_VWAP_STD_THRESHOLD",
                    defaults.detection.vwap_std_threshold,
                ),
                velocity_threshold: env_or(
                    "MARKET_MONITOR_VELOCITY_THRESHOLD",
                    defaults.detection.velocity_threshold,
                ),
            },
            min_confidence: env_or("MARKET_MONITOR_MIN_CONFIDENCE", defaults.min_confidence),
            cooldown_seconds: env_or("MARKET_MONITOR_COOLDOWN_SECONDS", defaults.cooldown_seconds),
            analysis_lookback_days: env_or(
                "MARKET_MONITOR_ANALYSIS_LOOKBACK_DAYS",
                defaults.analysis_lookback_days,
            ),
            history_days: env_or("MARKET_MONITOR_LOOKBACK_DAYS", defaults.history_days),
            interval: first_env(&["MARKET_MONITOR_INTERVAL"]).unwrap_or(defaults.interval),
            interval_multiplier: env_or(
                "MARKET_MONITOR_INTERVAL_MULTIPLIER",
                defaults.interval_multiplier,
            ),
            fast_percent_threshold: env_or(
                "FAST_MONITOR_PERCENT_THRESHOLD",
                defaults.fast_percent_threshold,
            ),
            fast_cooldown_seconds: env_or(
                "FAST_MONITOR_COOLDOWN_SECONDS",
                defaults.fast_cooldown_seconds,
            ),
            validation_exit_threshold: env_or(
                "VALIDATION_EXIT_THRESHOLD",
                defaults.validation_exit_threshold,
            ),
            user_id: first_env(&["MARKET_MONITOR_USER_ID"]).unwrap_or(defaults.user_id),
            strategy_id: first_env(&["MARKET_MONITOR_STRATEGY_ID"]).unwrap_or(defaults.strategy_id),
        }
    }
}
