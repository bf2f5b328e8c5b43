use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Sampling resolutions offered by the upstream candles endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    SixHours,
    OneDay,
}

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::OneMinute,
        Granularity::FiveMinutes,
        Granularity::FifteenMinutes,
        Granularity::OneHour,
        Granularity::SixHours,
        Granularity::OneDay,
    ];

    /// Tier width in seconds, as passed on the wire.
    pub fn seconds(self) -> u32 {
        match self {
            Granularity::OneMinute => 60,
            Granularity::FiveMinutes => 300,
            Granularity::FifteenMinutes => 900,
            Granularity::OneHour => 3_600,
            Granularity::SixHours => 21_600,
            Granularity::OneDay => 86_400,
        }
    }

    pub fn minutes(self) -> u32 {
        self.seconds() / 60
    }

    /// Rounds a requested interval up to the nearest supported tier.
    ///
    /// Anything coarser than the largest tier is capped at one day.
    pub fn for_interval_minutes(interval_minutes: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|g| interval_minutes <= g.minutes())
            .unwrap_or(Granularity::OneDay)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Granularity::OneMinute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::OneHour => "1h",
            Granularity::SixHours => "6h",
            Granularity::OneDay => "1d",
        };
        f.write_str(label)
    }
}

/// One bounded upstream request planned for a symbol.
///
/// Exists only for the duration of a run; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionWindow {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
}

impl CollectionWindow {
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for CollectionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} .. {}] @{}",
            self.symbol,
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ"),
            self.granularity
        )
    }
}

/// How the planner arrived at its windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanKind {
    /// No stored data; day-chunked backfill over `days_back`.
    Backfill,
    /// Small gap; one window re-covering the buffer up to now.
    Incremental,
    /// Large gap; day-chunked catch-up from the buffer up to now.
    CatchUp,
    /// Stored data is already at or ahead of now.
    UpToDate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub kind: PlanKind,
    pub windows: Vec<CollectionWindow>,
}
