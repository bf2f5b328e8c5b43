use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::market::errors::UpstreamError;
use crate::market::types::{RawCandle, Symbol};
use crate::planner::types::Granularity;

/// Abstract interface over the historical candles API.
///
/// Implementations must classify every failure into an `UpstreamError`
/// variant; retry and abort decisions are made by the caller.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Fetch raw candles with period starts in `[start, end]`.
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<RawCandle>, UpstreamError>;

    /// Cheap existence probe run once per symbol before its first window.
    ///
    /// `Ok(false)` means the provider definitely lacks the symbol.
    async fn is_supported(&self, symbol: &Symbol) -> Result<bool, UpstreamError> {
        let _ = symbol;
        Ok(true)
    }
}
