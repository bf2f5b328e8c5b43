use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for one collection run.
pub fn run_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "run",
        name = %name,
        trace_id = %trace_id.as_str(),
        symbols = field::Empty
    )
}

/// Child span for a single symbol's pipeline (inherits trace_id from the run span).
pub fn symbol_span(symbol: &str) -> Span {
    tracing::info_span!("symbol", symbol = %symbol, status = field::Empty)
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
