use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument};

use crate::market::types::{Candle, Symbol};
use crate::planner::types::CollectionWindow;
use crate::store::repository::{CandleStore, CommitReport, Gap, SymbolRegistry, SymbolSource};
use crate::time::from_unix_secs;

/// SQLx-backed candle persistence over the `historical` table.
#[derive(Clone)]
pub struct SqlxCandleStore {
    pool: AnyPool,
}

impl SqlxCandleStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleStore for SqlxCandleStore {
    async fn latest_timestamp(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
SELECT MAX(ts) AS latest
FROM historical
WHERE symbol = ? AND interval_minutes = ?;
"#,
        )
        .bind(symbol.code.clone())
        .bind(i64::from(interval_minutes))
        .fetch_one(&self.pool)
        .await
        .context("query latest timestamp")?;

        let latest: Option<i64> = row.try_get("latest")?;
        latest.map(ts_to_datetime).transpose()
    }

    #[instrument(
        skip(self, symbol, window, candles),
        fields(symbol = %symbol, window_start = %window.start, window_end = %window.end, records = candles.len()),
        level = "debug"
    )]
    async fn commit_candles(
        &self,
        symbol: &Symbol,
        window: &CollectionWindow,
        candles: &[Candle],
    ) -> anyhow::Result<CommitReport> {
        if let Some(stray) = candles.iter().find(|c| c.symbol != symbol.code) {
            return Err(anyhow!(
                "candle for {} in commit for {}",
                stray.symbol,
                symbol.code
            ));
        }

        let mut tx = self.pool.begin().await.context("begin commit")?;
        let mut report = CommitReport::default();

        for c in candles {
            let res = sqlx::query(
                r#"
INSERT INTO historical (symbol, interval_minutes, ts, open, high, low, close, volume)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (symbol, interval_minutes, ts) DO NOTHING;
"#,
            )
            .bind(c.symbol.clone())
            .bind(i64::from(c.interval_minutes))
            .bind(c.timestamp.timestamp())
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert candle {} @ {}", c.symbol, c.timestamp))?;

            if res.rows_affected() == 0 {
                report.duplicates += 1;
            } else {
                report.inserted += 1;
            }
        }

        // Dropping `tx` on an early return rolls the window back.
        tx.commit().await.context("commit window")?;

        debug!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            "window committed"
        );

        Ok(report)
    }

    async fn find_gaps(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        tolerance: f64,
    ) -> anyhow::Result<Vec<Gap>> {
        let rows = sqlx::query(
            r#"
SELECT ts
FROM historical
WHERE symbol = ? AND interval_minutes = ?
ORDER BY ts ASC;
"#,
        )
        .bind(symbol.code.clone())
        .bind(i64::from(interval_minutes))
        .fetch_all(&self.pool)
        .await
        .context("query timestamps for gaps")?;

        let ts: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("ts"))
            .collect::<Result<_, _>>()?;

        let max_step = f64::from(interval_minutes) * 60.0 * tolerance;

        let mut gaps = Vec::new();
        for pair in ts.windows(2) {
            if (pair[1] - pair[0]) as f64 > max_step {
                gaps.push(Gap {
                    after: ts_to_datetime(pair[0])?,
                    before: ts_to_datetime(pair[1])?,
                });
            }
        }

        Ok(gaps)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let res = sqlx::query(r#"DELETE FROM historical WHERE ts < ?;"#)
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await
            .context("prune historical")?;

        Ok(res.rows_affected())
    }

    async fn count(&self, symbol: &Symbol, interval_minutes: u32) -> anyhow::Result<u64> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM historical WHERE symbol = ? AND interval_minutes = ?;"#,
        )
        .bind(symbol.code.clone())
        .bind(i64::from(interval_minutes))
        .fetch_one(&self.pool)
        .await?;

        i64_to_u64(row.try_get("n")?)
    }

    async fn load_range(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
SELECT symbol, interval_minutes, ts, open, high, low, close, volume
FROM historical
WHERE symbol = ? AND interval_minutes = ? AND ts >= ? AND ts <= ?
ORDER BY ts ASC;
"#,
        )
        .bind(symbol.code.clone())
        .bind(i64::from(interval_minutes))
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_candle).collect()
    }
}

/// Symbol registry over the `cryptos` table.
#[derive(Clone)]
pub struct SqlxSymbolRepository {
    pool: AnyPool,
}

impl SqlxSymbolRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SymbolSource for SqlxSymbolRepository {
    async fn list_monitored(&self) -> anyhow::Result<Vec<Symbol>> {
        let rows = sqlx::query(
            r#"SELECT symbol, monitored FROM cryptos WHERE monitored = 1 ORDER BY symbol ASC;"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list monitored symbols")?;

        rows.iter().map(row_to_symbol).collect()
    }
}

#[async_trait]
impl SymbolRegistry for SqlxSymbolRepository {
    async fn upsert_symbol(&self, code: &str, monitored: bool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO cryptos (symbol, monitored) VALUES (?, ?)
ON CONFLICT (symbol) DO UPDATE SET monitored = excluded.monitored;
"#,
        )
        .bind(normalize_code(code))
        .bind(i64::from(monitored))
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert symbol {code}"))?;

        Ok(())
    }

    async fn set_monitored(&self, code: &str, monitored: bool) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"UPDATE cryptos SET monitored = ? WHERE symbol = ?;"#)
            .bind(i64::from(monitored))
            .bind(normalize_code(code))
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Symbol>> {
        let rows = sqlx::query(r#"SELECT symbol, monitored FROM cryptos ORDER BY symbol ASC;"#)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_symbol).collect()
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_candle(r: &sqlx::any::AnyRow) -> anyhow::Result<Candle> {
    Ok(Candle {
        symbol: r.try_get("symbol")?,
        timestamp: ts_to_datetime(r.try_get("ts")?)?,
        interval_minutes: i64_to_u32(r.try_get("interval_minutes")?)?,
        open: r.try_get("open")?,
        high: r.try_get("high")?,
        low: r.try_get("low")?,
        close: r.try_get("close")?,
        volume: r.try_get("volume")?,
    })
}

fn row_to_symbol(r: &sqlx::any::AnyRow) -> anyhow::Result<Symbol> {
    let monitored: i64 = r.try_get("monitored")?;
    Ok(Symbol {
        code: r.try_get("symbol")?,
        monitored: monitored == 1,
    })
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn ts_to_datetime(secs: i64) -> anyhow::Result<DateTime<Utc>> {
    from_unix_secs(secs).ok_or_else(|| anyhow!("timestamp out of range: {secs}"))
}

fn i64_to_u32(v: i64) -> anyhow::Result<u32> {
    u32::try_from(v).map_err(|_| anyhow!("out of range for u32: {v}"))
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    u64::try_from(v).map_err(|_| anyhow!("negative i64 where u64 expected: {v}"))
}
