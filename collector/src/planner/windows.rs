use chrono::{DateTime, Duration, Utc};
use tracing::{Span, debug, field, instrument};

use crate::config::CollectorConfig;
use crate::market::types::Symbol;
use crate::planner::types::{CollectionWindow, Granularity, Plan, PlanKind};

/// Computes the ordered windows needed to bring `symbol` up to `now`.
///
/// - no stored data → one window per day over `[now - days_back, now]`
/// - gap ≤ threshold → a single window `[latest - buffer, now]`
/// - gap > threshold → one window per day over `[latest - buffer, now]`
///
/// Windows are oldest first; adjacent windows share their boundary
/// instant (persistence is idempotent on the natural key).
#[instrument(
    target = "planner",
    skip(symbol, config),
    fields(symbol = %symbol, kind = field::Empty, windows = field::Empty)
)]
pub fn plan(
    symbol: &Symbol,
    latest_stored: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &CollectorConfig,
) -> Plan {
    let granularity = Granularity::for_interval_minutes(config.interval_minutes);

    let (kind, windows) = match latest_stored {
        None => {
            let start = now - Duration::days(i64::from(config.days_back));
            (
                PlanKind::Backfill,
                day_windows(symbol, start, now, granularity),
            )
        }
        Some(latest) => {
            let start = latest - Duration::days(i64::from(config.buffer_days));
            let gap = now - latest;

            if start >= now {
                (PlanKind::UpToDate, Vec::new())
            } else if gap <= Duration::days(i64::from(config.small_gap_threshold_days)) {
                (
                    PlanKind::Incremental,
                    vec![CollectionWindow {
                        symbol: symbol.code.clone(),
                        start,
                        end: now,
                        granularity,
                    }],
                )
            } else {
                debug!(
                    gap_days = gap.num_days(),
                    "gap exceeds threshold; chunking per day"
                );
                (
                    PlanKind::CatchUp,
                    day_windows(symbol, start, now, granularity),
                )
            }
        }
    };

    let span = Span::current();
    span.record("kind", field::debug(&kind));
    span.record("windows", windows.len());

    Plan { kind, windows }
}

/// Splits `[start, end]` into consecutive windows of at most one day.
/// The last window is clipped to `end`.
pub fn day_windows(
    symbol: &Symbol,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<CollectionWindow> {
    let mut out = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let next = (cursor + Duration::days(1)).min(end);
        out.push(CollectionWindow {
            symbol: symbol.code.clone(),
            start: cursor,
            end: next,
            granularity,
        });
        cursor = next;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn cfg() -> CollectorConfig {
        CollectorConfig::default()
    }

    fn sym() -> Symbol {
        Symbol::new("ETH-USD")
    }

    #[test]
    fn first_run_backfills_one_window_per_day() {
        let c = CollectorConfig {
            days_back: 3,
            ..cfg()
        };
        let p = plan(&sym(), None, now(), &c);

        assert_eq!(p.kind, PlanKind::Backfill);
        assert_eq!(p.windows.len(), 3);
        assert_eq!(p.windows[0].start, now() - Duration::days(3));
        assert_eq!(p.windows[2].end, now());
        for w in &p.windows {
            assert_eq!(w.span(), Duration::days(1));
            assert_eq!(w.granularity, Granularity::FifteenMinutes);
        }
    }

    #[test]
    fn gap_exactly_at_threshold_is_single_window() {
        let latest = now() - Duration::days(7);
        let p = plan(&sym(), Some(latest), now(), &cfg());

        assert_eq!(p.kind, PlanKind::Incremental);
        assert_eq!(p.windows.len(), 1);
        assert_eq!(p.windows[0].start, latest - Duration::days(1));
        assert_eq!(p.windows[0].end, now());
    }

    #[test]
    fn gap_one_past_threshold_is_day_chunked() {
        let latest = now() - Duration::days(8);
        let p = plan(&sym(), Some(latest), now(), &cfg());

        assert_eq!(p.kind, PlanKind::CatchUp);
        // ceil(8 days) + 1 buffer day
        assert_eq!(p.windows.len(), 9);
        assert_eq!(p.windows[0].start, latest - Duration::days(1));
        assert_eq!(p.windows.last().unwrap().end, now());
    }

    #[test]
    fn fractional_gap_rounds_window_count_up() {
        let latest = now() - Duration::days(8) - Duration::hours(12);
        let p = plan(&sym(), Some(latest), now(), &cfg());

        assert_eq!(p.windows.len(), 10);
        let last = p.windows.last().unwrap();
        assert_eq!(last.span(), Duration::hours(12));
        assert_eq!(last.end, now());
    }

    #[test]
    fn ten_day_gap_yields_eleven_windows() {
        let latest = now() - Duration::days(10);
        let p = plan(&sym(), Some(latest), now(), &cfg());
        assert_eq!(p.windows.len(), 11);
    }

    #[test]
    fn stored_data_ahead_of_clock_plans_nothing() {
        let latest = now() + Duration::days(2);
        let p = plan(&sym(), Some(latest), now(), &cfg());
        assert_eq!(p.kind, PlanKind::UpToDate);
        assert!(p.windows.is_empty());
    }

    #[test]
    fn zero_buffer_with_fresh_data_still_refetches_to_now() {
        let c = CollectorConfig {
            buffer_days: 0,
            ..cfg()
        };
        let latest = now() - Duration::minutes(30);
        let p = plan(&sym(), Some(latest), now(), &c);
        assert_eq!(p.windows.len(), 1);
        assert_eq!(p.windows[0].start, latest);
    }

    #[test]
    fn granularity_tiers_round_up() {
        use Granularity::*;
        assert_eq!(Granularity::for_interval_minutes(1), OneMinute);
        assert_eq!(Granularity::for_interval_minutes(3), FiveMinutes);
        assert_eq!(Granularity::for_interval_minutes(5), FiveMinutes);
        assert_eq!(
            Granularity::for_interval_minutes(10),
            Granularity::for_interval_minutes(15)
        );
        assert_eq!(Granularity::for_interval_minutes(60), OneHour);
        assert!(Granularity::for_interval_minutes(90) >= OneHour);
        assert_eq!(Granularity::for_interval_minutes(90), SixHours);
        assert_eq!(Granularity::for_interval_minutes(360), SixHours);
        assert_eq!(Granularity::for_interval_minutes(10_000), OneDay);
    }

    #[test]
    fn plan_uses_mapped_granularity() {
        let c = CollectorConfig {
            interval_minutes: 90,
            days_back: 1,
            ..cfg()
        };
        let p = plan(&sym(), None, now(), &c);
        assert_eq!(p.windows[0].granularity, Granularity::SixHours);
        assert_eq!(p.windows[0].granularity.seconds(), 21_600);
    }
}
