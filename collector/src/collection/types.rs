use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::metrics::CounterSnapshot;
use crate::planner::types::PlanKind;

/// Terminal state of one symbol's pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolStatus {
    /// Every planned window committed (including an empty plan).
    Done,
    /// At least one window failed; the others committed.
    PartiallyDone,
    /// Provider lacks the symbol.
    Skipped,
    /// Started, then stopped between windows.
    Aborted,
    /// Never started.
    NotAttempted,
}

impl SymbolStatus {
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            SymbolStatus::PartiallyDone | SymbolStatus::Aborted | SymbolStatus::NotAttempted
        )
    }
}

impl fmt::Display for SymbolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolStatus::Done => "done",
            SymbolStatus::PartiallyDone => "partially_done",
            SymbolStatus::Skipped => "skipped",
            SymbolStatus::Aborted => "aborted",
            SymbolStatus::NotAttempted => "not_attempted",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FailedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub status: SymbolStatus,
    pub plan_kind: Option<PlanKind>,
    pub windows_planned: usize,
    pub windows_committed: usize,
    pub failed_windows: Vec<FailedWindow>,
    pub candles_inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Why the symbol was skipped or aborted.
    pub note: Option<String>,
}

impl SymbolOutcome {
    pub fn new(symbol: impl Into<String>, status: SymbolStatus) -> Self {
        Self {
            symbol: symbol.into(),
            status,
            plan_kind: None,
            windows_planned: 0,
            windows_committed: 0,
            failed_windows: Vec::new(),
            candles_inserted: 0,
            duplicates: 0,
            rejected: 0,
            note: None,
        }
    }

    pub fn windows_failed(&self) -> usize {
        self.failed_windows.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    PartialFailure,
    CriticalFailure,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::CriticalFailure => 2,
        }
    }

    /// A run-fatal error wins; any degraded symbol or an unreadable
    /// symbol source is a partial failure.
    pub fn aggregate(outcomes: &[SymbolOutcome], source_failed: bool, fatal: bool) -> Self {
        if fatal {
            RunStatus::CriticalFailure
        } else if source_failed || outcomes.iter().any(|o| o.status.is_degraded()) {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::CriticalFailure => "critical_failure",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub trace_id: String,
    pub status: RunStatus,
    /// In symbol source order.
    pub symbols: Vec<SymbolOutcome>,
    pub source_error: Option<String>,
    pub fatal_error: Option<String>,
    pub cancelled: bool,
    /// Inter-request delay in effect when the run ended.
    pub final_request_delay: Duration,
    pub counters: CounterSnapshot,
}

impl RunSummary {
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols.iter().find(|o| o.symbol == symbol)
    }

    pub fn count(&self, status: SymbolStatus) -> usize {
        self.symbols.iter().filter(|o| o.status == status).count()
    }
}
