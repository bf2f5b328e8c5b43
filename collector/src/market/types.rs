use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A trading pair as known to the symbol registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    /// Registry code, e.g. "BTC-USD".
    pub code: String,
    /// Historical collection is only performed for monitored symbols.
    pub monitored: bool,
}

impl Symbol {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            monitored: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Product id used on the upstream exchange.
    ///
    /// Codes already carrying a quote currency are upper-cased as-is;
    /// a bare asset code is quoted in USD.
    pub fn upstream_id(&self) -> String {
        let code = self.code.trim().to_uppercase();
        if code.contains('-') {
            code
        } else {
            format!("{code}-USD")
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// One provider tuple as received on the wire, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawCandle(pub Vec<serde_json::Value>);

/// Canonical, validated OHLCV record.
///
/// Natural key: (symbol, interval_minutes, timestamp). Never updated once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    /// Period start, UTC.
    pub timestamp: DateTime<Utc>,
    pub interval_minutes: u32,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// `low <= min(open, close) <= max(open, close) <= high` and `volume >= 0`.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.volume >= 0.0
    }
}
