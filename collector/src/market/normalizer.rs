//! Raw provider tuples → canonical `Candle`s.
//!
//! Coinbase candle layout: `[time, low, high, open, close, volume]`,
//! `time` in epoch seconds at period start. Numeric fields may arrive as
//! JSON numbers or numeric strings.
//!
//! Validation is per record: a bad tuple is dropped and logged, the rest
//! of the batch survives.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::market::types::{Candle, RawCandle, Symbol};
use crate::time::from_unix_secs;

const FIELDS: usize = 6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("expected 6 fields, got {0}")]
    WrongArity(usize),

    #[error("field `{field}` is not numeric: {raw}")]
    NotNumeric { field: &'static str, raw: String },

    #[error("timestamp {0} out of range")]
    BadTimestamp(i64),

    #[error("`{field}` must be positive and finite, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("volume must be non-negative, got {0}")]
    NegativeVolume(f64),

    #[error("ohlc invariant violated: open={open} high={high} low={low} close={close}")]
    Inconsistent {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// Result of normalizing one window's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Accepted candles, ascending by timestamp, unique per timestamp.
    pub candles: Vec<Candle>,
    pub rejected: usize,
}

pub fn normalize(
    raw: &RawCandle,
    symbol: &Symbol,
    interval_minutes: u32,
) -> Result<Candle, Rejection> {
    let fields = &raw.0;
    if fields.len() < FIELDS {
        return Err(Rejection::WrongArity(fields.len()));
    }

    let ts_secs = number(&fields[0], "time")?;
    if !ts_secs.is_finite() {
        return Err(Rejection::NotNumeric {
            field: "time",
            raw: fields[0].to_string(),
        });
    }
    let ts_secs = ts_secs.trunc() as i64;
    let timestamp = from_unix_secs(ts_secs).ok_or(Rejection::BadTimestamp(ts_secs))?;

    let low = price(&fields[1], "low")?;
    let high = price(&fields[2], "high")?;
    let open = price(&fields[3], "open")?;
    let close = price(&fields[4], "close")?;

    let volume = number(&fields[5], "volume")?;
    if !volume.is_finite() || volume < 0.0 {
        return Err(Rejection::NegativeVolume(volume));
    }

    let candle = Candle {
        symbol: symbol.code.clone(),
        timestamp,
        interval_minutes,
        open,
        high,
        low,
        close,
        volume,
    };

    if !candle.is_consistent() {
        return Err(Rejection::Inconsistent {
            open,
            high,
            low,
            close,
        });
    }

    Ok(candle)
}

/// Normalizes a whole batch with partial acceptance.
pub fn normalize_batch(
    raw: &[RawCandle],
    symbol: &Symbol,
    interval_minutes: u32,
) -> NormalizedBatch {
    let mut candles = Vec::with_capacity(raw.len());
    let mut rejected = 0usize;

    for r in raw {
        match normalize(r, symbol, interval_minutes) {
            Ok(c) => candles.push(c),
            Err(reason) => {
                rejected += 1;
                warn!(symbol = %symbol, %reason, "dropping invalid candle");
            }
        }
    }

    // Upstream returns newest first and may repeat a period.
    candles.sort_by_key(|c| c.timestamp);
    let before = candles.len();
    candles.dedup_by_key(|c| c.timestamp);
    if candles.len() < before {
        debug!(
            symbol = %symbol,
            duplicates = before - candles.len(),
            "collapsed duplicate periods within batch"
        );
    }

    NormalizedBatch { candles, rejected }
}

fn number(v: &Value, field: &'static str) -> Result<f64, Rejection> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| Rejection::NotNumeric {
        field,
        raw: v.to_string(),
    })
}

fn price(v: &Value, field: &'static str) -> Result<f64, Rejection> {
    let value = number(v, field)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(Rejection::NonPositivePrice { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn raw(v: serde_json::Value) -> RawCandle {
        serde_json::from_value(v).unwrap()
    }

    fn eth() -> Symbol {
        Symbol::new("ETH-USD")
    }

    #[test]
    fn parses_coinbase_field_order() {
        let c = normalize(&raw(json!([1_700_000_100, 9.0, 12.0, 10.0, 11.0, 3.5])), &eth(), 15)
            .unwrap();

        assert_eq!(c.timestamp.timestamp(), 1_700_000_100);
        assert_eq!(c.low, 9.0);
        assert_eq!(c.high, 12.0);
        assert_eq!(c.open, 10.0);
        assert_eq!(c.close, 11.0);
        assert_eq!(c.volume, 3.5);
        assert_eq!(c.symbol, "ETH-USD");
        assert_eq!(c.interval_minutes, 15);
    }

    #[test]
    fn accepts_numeric_strings() {
        let c = normalize(
            &raw(json!(["1700000100", "9.0", "12", "10", "11", "0"])),
            &eth(),
            15,
        )
        .unwrap();
        assert_eq!(c.high, 12.0);
        assert_eq!(c.volume, 0.0);
    }

    #[test]
    fn rejects_high_below_low() {
        let err = normalize(&raw(json!([1_700_000_100, 12.0, 9.0, 10.0, 11.0, 1.0])), &eth(), 15)
            .unwrap_err();
        assert!(matches!(err, Rejection::Inconsistent { .. }));
    }

    #[test]
    fn rejects_close_above_high() {
        let err = normalize(&raw(json!([1_700_000_100, 9.0, 10.0, 9.5, 10.5, 1.0])), &eth(), 15)
            .unwrap_err();
        assert!(matches!(err, Rejection::Inconsistent { .. }));
    }

    #[test]
    fn rejects_negative_volume_and_zero_price() {
        assert_eq!(
            normalize(&raw(json!([1_700_000_100, 9.0, 12.0, 10.0, 11.0, -1.0])), &eth(), 15),
            Err(Rejection::NegativeVolume(-1.0))
        );
        assert!(matches!(
            normalize(&raw(json!([1_700_000_100, 0.0, 12.0, 10.0, 11.0, 1.0])), &eth(), 15),
            Err(Rejection::NonPositivePrice { field: "low", .. })
        ));
    }

    #[test]
    fn rejects_short_and_non_numeric_tuples() {
        assert_eq!(
            normalize(&raw(json!([1_700_000_100, 9.0, 12.0])), &eth(), 15),
            Err(Rejection::WrongArity(3))
        );
        assert!(matches!(
            normalize(&raw(json!([1_700_000_100, null, 12.0, 10.0, 11.0, 1.0])), &eth(), 15),
            Err(Rejection::NotNumeric { field: "low", .. })
        ));
    }

    #[test]
    #[traced_test]
    fn batch_keeps_valid_records_sorted_and_unique() {
        let batch = vec![
            raw(json!([1_700_001_800, 9.0, 12.0, 10.0, 11.0, 1.0])),
            raw(json!([1_700_000_900, 12.0, 9.0, 10.0, 11.0, 1.0])), // high < low
            raw(json!([1_700_000_000, 9.0, 12.0, 10.0, 11.0, 1.0])),
            raw(json!([1_700_001_800, 9.0, 12.0, 10.0, 11.0, 1.0])), // repeated period
        ];

        let out = normalize_batch(&batch, &eth(), 15);

        assert_eq!(out.rejected, 1);
        let ts: Vec<i64> = out.candles.iter().map(|c| c.timestamp.timestamp()).collect();
        assert_eq!(ts, vec![1_700_000_000, 1_700_001_800]);
        assert!(logs_contain("dropping invalid candle"));
    }

    #[test]
    fn empty_batch_is_not_an_error() {
        let out = normalize_batch(&[], &eth(), 15);
        assert!(out.candles.is_empty());
        assert_eq!(out.rejected, 0);
    }
}
