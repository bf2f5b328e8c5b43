use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Symbol registry, written by the pair price collector
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS cryptos (
  symbol TEXT PRIMARY KEY,
  monitored INTEGER NOT NULL DEFAULT 0 CHECK (monitored IN (0,1))
);
"#,
    )
    .execute(pool)
    .await?;

    // Historical candles, one series per (symbol, interval)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS historical (
  symbol TEXT NOT NULL,
  interval_minutes INTEGER NOT NULL CHECK (interval_minutes > 0),
  ts BIGINT NOT NULL,
  open DOUBLE PRECISION NOT NULL CHECK (open > 0),
  high DOUBLE PRECISION NOT NULL CHECK (high > 0),
  low DOUBLE PRECISION NOT NULL CHECK (low > 0),
  close DOUBLE PRECISION NOT NULL CHECK (close > 0),
  volume DOUBLE PRECISION NOT NULL CHECK (volume >= 0),
  CHECK (high >= low),
  CHECK (high >= open AND high >= close),
  CHECK (low <= open AND low <= close),
  PRIMARY KEY (symbol, interval_minutes, ts)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_historical_ts ON historical(ts);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_cryptos_monitored ON cryptos(monitored);"#)
        .execute(pool)
        .await?;

    Ok(())
}
