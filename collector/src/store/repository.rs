use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::market::types::{Candle, Symbol};
use crate::planner::types::CollectionWindow;

/// Neighbouring candles further apart than this many intervals form a gap.
pub const DEFAULT_GAP_TOLERANCE: f64 = 1.5;

/// Outcome of committing one window's candles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub inserted: u64,
    /// Records whose natural key already existed; left untouched.
    pub duplicates: u64,
}

/// Two consecutive stored candles further apart than the tolerance allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
}

impl Gap {
    pub fn duration(&self) -> Duration {
        self.before - self.after
    }
}

#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn latest_timestamp(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Persists all of `candles` or none of them. Existing keys are
    /// counted as duplicates, never overwritten.
    async fn commit_candles(
        &self,
        symbol: &Symbol,
        window: &CollectionWindow,
        candles: &[Candle],
    ) -> Result<CommitReport>;

    /// Consecutive candles more than `tolerance × interval` apart.
    async fn find_gaps(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        tolerance: f64,
    ) -> Result<Vec<Gap>>;

    /// Deletes candles with a period start before `cutoff`, all series.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count(&self, symbol: &Symbol, interval_minutes: u32) -> Result<u64>;

    /// Candles with `start <= timestamp <= end`, ascending.
    async fn load_range(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Ordered list of symbols a run should process.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn list_monitored(&self) -> Result<Vec<Symbol>>;
}

#[async_trait]
pub trait SymbolRegistry: Send + Sync {
    async fn upsert_symbol(&self, code: &str, monitored: bool) -> Result<()>;

    /// Returns `false` if the symbol is unknown.
    async fn set_monitored(&self, code: &str, monitored: bool) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<Symbol>>;
}
