//! Collection run driver.
//!
//! Each monitored symbol goes through an explicit state machine:
//!
//! ```text
//! Planning -> Fetching -> Normalizing -> Committing -> (next window | Done)
//!     |           |                          |
//!     v           +------> WindowFailed <----+
//!  Skipped                     |
//!                              +--> (next window | Done)
//! ```
//!
//! Windows of one symbol are strictly sequential. Symbols run on a
//! bounded pool sharing one `RateController`. Cancellation and run-fatal
//! errors are honored between windows, never mid-window.

use std::sync::Arc;
use std::time::Duration;

use common::logger::{TraceId, run_span, symbol_span, warn_if_slow};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, info, warn};

use crate::collection::types::{FailedWindow, RunStatus, RunSummary, SymbolOutcome, SymbolStatus};
use crate::config::CollectorConfig;
use crate::market::errors::UpstreamError;
use crate::market::normalizer::normalize_batch;
use crate::market::provider::CandleProvider;
use crate::market::types::{Candle, RawCandle, Symbol};
use crate::metrics::Counters;
use crate::planner::{self, CollectionWindow};
use crate::rate::RateController;
use crate::store::repository::{CandleStore, SymbolSource};
use crate::time::{Clock, SystemClock};

const SLOW_COMMIT: Duration = Duration::from_secs(2);

/// Per-symbol pipeline state. `usize` fields index into the plan.
enum Phase {
    Planning,
    Fetching(usize),
    Normalizing(usize, Vec<RawCandle>),
    Committing(usize, Vec<Candle>),
    WindowFailed(usize, String),
    Done,
    Skipped(String),
    Aborted(String),
}

/// Run-wide abort state shared by all workers.
struct RunGuard {
    /// Trips on external cancellation or on a run-fatal error.
    stop: CancellationToken,
    fatal: Mutex<Option<String>>,
}

impl RunGuard {
    fn trip_fatal(&self, reason: String) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            error!(%reason, "run-fatal upstream error; aborting remaining symbols");
            *fatal = Some(reason);
        }
        drop(fatal);
        self.stop.cancel();
    }

    fn stop_reason(&self) -> String {
        match self.fatal.lock().as_ref() {
            Some(reason) => format!("aborted after fatal error: {reason}"),
            None => "cancelled".to_string(),
        }
    }
}

pub struct CollectionOrchestrator {
    provider: Arc<dyn CandleProvider>,
    store: Arc<dyn CandleStore>,
    symbols: Arc<dyn SymbolSource>,
    rate: Arc<RateController>,
    config: CollectorConfig,
    clock: Arc<dyn Clock>,
    workers: usize,
    counters: Counters,
}

impl CollectionOrchestrator {
    pub fn new(
        provider: Arc<dyn CandleProvider>,
        store: Arc<dyn CandleStore>,
        symbols: Arc<dyn SymbolSource>,
        config: CollectorConfig,
    ) -> Self {
        let counters = Counters::default();
        let rate = Arc::new(RateController::with_counters(
            config.retry_policy(),
            counters.clone(),
        ));

        Self {
            provider,
            store,
            symbols,
            rate,
            config,
            clock: Arc::new(SystemClock),
            workers: 1,
            counters,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn rate_controller(&self) -> &Arc<RateController> {
        &self.rate
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Executes one collection pass. Always returns a summary.
    pub async fn run(&self, cancel: CancellationToken) -> RunSummary {
        let trace_id = TraceId::default();
        let span = run_span("collect", &trace_id);
        self.run_inner(trace_id, cancel).instrument(span).await
    }

    async fn run_inner(&self, trace_id: TraceId, cancel: CancellationToken) -> RunSummary {
        self.rate.reset();

        let (symbols, source_error) = match self.symbols.list_monitored().await {
            Ok(s) => (s, None),
            Err(e) => {
                error!(error = %format!("{e:#}"), "symbol source failed");
                (Vec::new(), Some(format!("{e:#}")))
            }
        };

        Span::current().record("symbols", symbols.len());
        info!(
            symbols = symbols.len(),
            workers = self.workers,
            interval_minutes = self.config.interval_minutes,
            "collection run started"
        );

        let guard = RunGuard {
            stop: cancel.child_token(),
            fatal: Mutex::new(None),
        };

        let mut indexed: Vec<(usize, SymbolOutcome)> = stream::iter(symbols.into_iter().enumerate())
            .map(|(i, symbol)| {
                let guard = &guard;
                async move { (i, self.collect_symbol(symbol, guard).await) }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        let outcomes: Vec<SymbolOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        let fatal_error = guard.fatal.lock().clone();
        let status = RunStatus::aggregate(&outcomes, source_error.is_some(), fatal_error.is_some());

        let summary = RunSummary {
            trace_id: trace_id.to_string(),
            status,
            symbols: outcomes,
            source_error,
            fatal_error,
            cancelled: cancel.is_cancelled(),
            final_request_delay: self.rate.snapshot().current_delay,
            counters: self.counters.snapshot(),
        };

        log_summary(&summary);
        summary
    }

    async fn collect_symbol(&self, symbol: Symbol, guard: &RunGuard) -> SymbolOutcome {
        let mut outcome = SymbolOutcome::new(symbol.code.clone(), SymbolStatus::NotAttempted);
        if guard.stop.is_cancelled() {
            outcome.note = Some(guard.stop_reason());
            return outcome;
        }

        let span = symbol_span(&symbol.code);
        async {
            self.drive(&symbol, guard, &mut outcome).await;
            Span::current().record("status", field::display(outcome.status));
            outcome
        }
        .instrument(span)
        .await
    }

    /// Runs the state machine to a terminal phase, filling `outcome`.
    async fn drive(&self, symbol: &Symbol, guard: &RunGuard, outcome: &mut SymbolOutcome) {
        let mut windows: Vec<CollectionWindow> = Vec::new();
        let mut phase = Phase::Planning;

        loop {
            phase = match phase {
                Phase::Planning => self.plan_symbol(symbol, guard, outcome, &mut windows).await,

                Phase::Fetching(i) => {
                    if guard.stop.is_cancelled() {
                        Phase::Aborted(guard.stop_reason())
                    } else {
                        self.fetch(symbol, &windows[i], i, guard).await
                    }
                }

                Phase::Normalizing(i, raw) => {
                    let batch = normalize_batch(&raw, symbol, self.config.interval_minutes);
                    let rejected = batch.rejected as u64;
                    outcome.rejected += rejected;
                    Counters::add(&self.counters.candles_rejected, rejected);

                    debug!(
                        window_start = %windows[i].start,
                        window_end = %windows[i].end,
                        received = raw.len(),
                        accepted = batch.candles.len(),
                        rejected,
                        "window normalized"
                    );
                    Phase::Committing(i, batch.candles)
                }

                Phase::Committing(i, candles) => {
                    let w = &windows[i];
                    let res = warn_if_slow(
                        "commit_candles",
                        SLOW_COMMIT,
                        self.store.commit_candles(symbol, w, &candles),
                    )
                    .await;

                    match res {
                        Ok(report) => {
                            outcome.windows_committed += 1;
                            outcome.candles_inserted += report.inserted;
                            outcome.duplicates += report.duplicates;
                            Counters::incr(&self.counters.windows_committed);
                            Counters::add(&self.counters.candles_inserted, report.inserted);
                            Counters::add(&self.counters.candles_duplicate, report.duplicates);

                            info!(
                                window_start = %w.start,
                                window_end = %w.end,
                                granularity = %w.granularity,
                                inserted = report.inserted,
                                duplicates = report.duplicates,
                                "window committed"
                            );
                            next_window(i, windows.len())
                        }
                        Err(e) => Phase::WindowFailed(i, format!("commit failed: {e:#}")),
                    }
                }

                Phase::WindowFailed(i, reason) => {
                    let w = &windows[i];
                    warn!(
                        window_start = %w.start,
                        window_end = %w.end,
                        granularity = %w.granularity,
                        %reason,
                        "window failed"
                    );
                    Counters::incr(&self.counters.windows_failed);
                    outcome.failed_windows.push(FailedWindow {
                        start: w.start,
                        end: w.end,
                        reason,
                    });
                    next_window(i, windows.len())
                }

                Phase::Done => {
                    outcome.status = if outcome.failed_windows.is_empty() {
                        SymbolStatus::Done
                    } else {
                        SymbolStatus::PartiallyDone
                    };
                    info!(
                        planned = outcome.windows_planned,
                        committed = outcome.windows_committed,
                        failed = outcome.windows_failed(),
                        "symbol finished"
                    );
                    return;
                }

                Phase::Skipped(reason) => {
                    info!(%reason, "symbol skipped");
                    outcome.status = SymbolStatus::Skipped;
                    outcome.note = Some(reason);
                    return;
                }

                Phase::Aborted(reason) => {
                    warn!(
                        %reason,
                        committed = outcome.windows_committed,
                        remaining = outcome
                            .windows_planned
                            .saturating_sub(outcome.windows_committed + outcome.windows_failed()),
                        "symbol aborted between windows"
                    );
                    outcome.status = SymbolStatus::Aborted;
                    outcome.note = Some(reason);
                    return;
                }
            };
        }
    }

    async fn plan_symbol(
        &self,
        symbol: &Symbol,
        guard: &RunGuard,
        outcome: &mut SymbolOutcome,
        windows: &mut Vec<CollectionWindow>,
    ) -> Phase {
        let probe = self
            .rate
            .execute("is_supported", || self.provider.is_supported(symbol))
            .await;

        match probe {
            Ok(true) => {}
            Ok(false) => return Phase::Skipped("not listed upstream".to_string()),
            Err(UpstreamError::UnsupportedSymbol(id)) => {
                return Phase::Skipped(format!("{id} not listed upstream"));
            }
            Err(e) if e.is_fatal() => {
                guard.trip_fatal(e.to_string());
                return Phase::Aborted(guard.stop_reason());
            }
            Err(e) => warn!(error = %e, "support probe failed; assuming supported"),
        }

        let latest = match self
            .store
            .latest_timestamp(symbol, self.config.interval_minutes)
            .await
        {
            Ok(l) => l,
            Err(e) => return Phase::Aborted(format!("latest timestamp unavailable: {e:#}")),
        };

        let plan = planner::plan(symbol, latest, self.clock.now(), &self.config);
        outcome.plan_kind = Some(plan.kind);
        outcome.windows_planned = plan.windows.len();

        info!(
            latest = ?latest,
            kind = ?plan.kind,
            windows = plan.windows.len(),
            "symbol planned"
        );

        *windows = plan.windows;
        next_window_from_start(windows.len())
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        w: &CollectionWindow,
        i: usize,
        guard: &RunGuard,
    ) -> Phase {
        debug!(
            window_start = %w.start,
            window_end = %w.end,
            granularity = %w.granularity,
            "fetching window"
        );

        let res = self
            .rate
            .execute("fetch_candles", || {
                self.provider
                    .fetch_candles(symbol, w.start, w.end, w.granularity)
            })
            .await;

        match res {
            Ok(raw) => Phase::Normalizing(i, raw),
            Err(UpstreamError::UnsupportedSymbol(id)) => {
                Phase::Skipped(format!("{id} not found upstream"))
            }
            Err(e) if e.is_fatal() => {
                guard.trip_fatal(e.to_string());
                Phase::Aborted(guard.stop_reason())
            }
            Err(e) => Phase::WindowFailed(i, e.to_string()),
        }
    }
}

fn next_window(current: usize, total: usize) -> Phase {
    if current + 1 < total {
        Phase::Fetching(current + 1)
    } else {
        Phase::Done
    }
}

fn next_window_from_start(total: usize) -> Phase {
    if total == 0 {
        Phase::Done
    } else {
        Phase::Fetching(0)
    }
}

fn log_summary(summary: &RunSummary) {
    let c = &summary.counters;
    info!(
        status = %summary.status,
        done = summary.count(SymbolStatus::Done),
        partially_done = summary.count(SymbolStatus::PartiallyDone),
        skipped = summary.count(SymbolStatus::Skipped),
        aborted = summary.count(SymbolStatus::Aborted),
        not_attempted = summary.count(SymbolStatus::NotAttempted),
        upstream_calls = c.upstream_calls,
        rate_limited = c.rate_limited,
        transient_retries = c.transient_retries,
        windows_committed = c.windows_committed,
        windows_failed = c.windows_failed,
        candles_inserted = c.candles_inserted,
        candles_duplicate = c.candles_duplicate,
        candles_rejected = c.candles_rejected,
        final_delay_ms = summary.final_request_delay.as_millis() as u64,
        "collection run finished"
    );
}
