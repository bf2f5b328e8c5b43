use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::rate::RetryPolicy;

/// Upper bound for `days_back` and `buffer_days`.
pub const MAX_HORIZON_DAYS: u32 = 3650;

/// Upper bound for every configured delay.
pub const MAX_DELAY_SECONDS: f64 = 3600.0;

/// Engine options consumed by the planner, rate controller and orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectorConfig {
    /// Initial backfill horizon used when a symbol has no stored candles.
    pub days_back: u32,

    /// Requested sampling interval. Mapped onto the nearest coarser
    /// upstream granularity; also part of the stored series key.
    pub interval_minutes: u32,

    /// Overlap re-fetched behind the latest stored candle.
    ///
    /// Upstream may revise the most recent period; persistence is
    /// idempotent so re-fetching the tail is safe.
    pub buffer_days: u32,

    /// Gaps up to this many days are fetched as one window,
    /// longer gaps are chunked per day.
    pub small_gap_threshold_days: u32,

    // =========================
    // Retry / rate configuration
    // =========================
    /// Total attempts for a transiently failing request (first try included).
    pub max_attempts: u32,

    /// Exponential multiplier applied per transient retry.
    pub backoff_factor: f64,

    /// First transient retry waits this long.
    pub initial_delay_seconds: f64,

    /// Inter-request delay at the start of every run.
    pub base_request_delay_seconds: f64,

    /// Ceiling for the adaptive inter-request delay.
    pub max_request_delay_seconds: f64,

    /// Rate-limit signals tolerated for one request before the window fails.
    /// Independent of `max_attempts`.
    pub max_rate_limited_retries: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            days_back: 60,
            interval_minutes: 15,
            buffer_days: 1,
            small_gap_threshold_days: 7,
            max_attempts: 3,
            backoff_factor: 2.0,
            initial_delay_seconds: 1.0,
            base_request_delay_seconds: 0.5,
            max_request_delay_seconds: 5.0,
            max_rate_limited_retries: 8,
        }
    }
}

impl CollectorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_factor: self.backoff_factor,
            initial_delay: Duration::from_secs_f64(self.initial_delay_seconds),
            base_request_delay: Duration::from_secs_f64(self.base_request_delay_seconds),
            max_request_delay: Duration::from_secs_f64(self.max_request_delay_seconds),
            max_rate_limited_retries: self.max_rate_limited_retries,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("days_back", self.days_back),
            ("interval_minutes", self.interval_minutes),
            ("small_gap_threshold_days", self.small_gap_threshold_days),
            ("max_attempts", self.max_attempts),
        ];
        for (name, v) in positive {
            if v == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        let horizons = [
            ("days_back", self.days_back),
            ("buffer_days", self.buffer_days),
        ];
        for (name, v) in horizons {
            if v > MAX_HORIZON_DAYS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_HORIZON_DAYS}, got {v}"
                )));
            }
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }

        let delays = [
            ("initial_delay_seconds", self.initial_delay_seconds),
            ("base_request_delay_seconds", self.base_request_delay_seconds),
            ("max_request_delay_seconds", self.max_request_delay_seconds),
        ];
        for (name, v) in delays {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {v}"
                )));
            }
            if v > MAX_DELAY_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_DELAY_SECONDS} seconds, got {v}"
                )));
            }
        }

        if self.base_request_delay_seconds > self.max_request_delay_seconds {
            return Err(ConfigError::Invalid(
                "base_request_delay_seconds exceeds max_request_delay_seconds".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Database connection string (any sqlx `Any` driver URL).
    pub database_url: String,

    /// Base URL of the candles API.
    pub upstream_base_url: String,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Number of symbols collected concurrently. All workers share one
    /// rate controller.
    pub workers: usize,

    /// Optional wall-clock bound for a run; honored between windows.
    pub run_timeout: Option<Duration>,

    /// Symbols used when the database has none flagged as monitored.
    pub fallback_symbols: Vec<String>,

    /// Emit JSON logs.
    pub log_json: bool,

    pub collector: CollectorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    /// Missing keys fall back to defaults; present but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CollectorConfig::default();

        let collector = CollectorConfig {
            days_back: parse_or(&lookup, "CANDLES_DAYS_BACK", defaults.days_back)?,
            interval_minutes: parse_or(
                &lookup,
                "CANDLES_INTERVAL_MINUTES",
                defaults.interval_minutes,
            )?,
            buffer_days: parse_or(&lookup, "CANDLES_BUFFER_DAYS", defaults.buffer_days)?,
            small_gap_threshold_days: parse_or(
                &lookup,
                "CANDLES_SMALL_GAP_THRESHOLD_DAYS",
                defaults.small_gap_threshold_days,
            )?,
            max_attempts: parse_or(&lookup, "CANDLES_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_factor: parse_or(&lookup, "CANDLES_BACKOFF_FACTOR", defaults.backoff_factor)?,
            initial_delay_seconds: parse_or(
                &lookup,
                "CANDLES_INITIAL_DELAY_SECONDS",
                defaults.initial_delay_seconds,
            )?,
            base_request_delay_seconds: parse_or(
                &lookup,
                "CANDLES_BASE_REQUEST_DELAY_SECONDS",
                defaults.base_request_delay_seconds,
            )?,
            max_request_delay_seconds: parse_or(
                &lookup,
                "CANDLES_MAX_REQUEST_DELAY_SECONDS",
                defaults.max_request_delay_seconds,
            )?,
            max_rate_limited_retries: parse_or(
                &lookup,
                "CANDLES_MAX_RATE_LIMITED_RETRIES",
                defaults.max_rate_limited_retries,
            )?,
        };
        collector.validate()?;

        let workers: usize = parse_or(&lookup, "CANDLES_WORKERS", 1)?;
        if workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive".to_string()));
        }

        let run_timeout = match lookup("CANDLES_RUN_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value(
                "CANDLES_RUN_TIMEOUT_SECS",
                &raw,
            )?)),
            None => None,
        };

        let fallback_symbols = lookup("CANDLES_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://candles.db?mode=rwc".to_string()),
            upstream_base_url: lookup("CANDLES_UPSTREAM_URL")
                .unwrap_or_else(|| "https://api.exchange.coinbase.com".to_string()),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CANDLES_REQUEST_TIMEOUT_SECS",
                30u64,
            )?),
            workers,
            run_timeout,
            fallback_symbols,
            log_json: lookup("APP_ENV").as_deref() == Some("production"),
            collector,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::Unparsable {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
