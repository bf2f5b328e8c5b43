pub mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cli::{Cli, Command, RunArgs};
use collector::collection::{CollectionOrchestrator, RunSummary, SymbolStatus};
use collector::config::AppConfig;
use collector::db::Db;
use collector::market::coinbase::CoinbaseClient;
use collector::market::types::Symbol;
use collector::store::{
    CandleStore, DEFAULT_GAP_TOLERANCE, SqlxCandleStore, SqlxSymbolRepository, SymbolRegistry,
    SymbolSource,
};
use collector::symbols::{FallbackSymbolSource, MonitorChange, StaticSymbols, apply_monitor_flag};
use common::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = AppConfig::from_env().context("load configuration")?;
    init_logger("candles", cfg.log_json);

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await.context("migrate schema")?;

    let code = match cli.command {
        Command::Run(args) => run(&cfg, &db, args).await?,
        Command::Gaps { symbol } => gaps(&cfg, &db, &symbol).await?,
        Command::Prune { older_than_days } => prune(&db, older_than_days).await?,
        Command::Monitor { symbol, off } => monitor(&db, &symbol, !off).await?,
        Command::Symbols => symbols(&db).await?,
    };

    std::process::exit(code);
}

/// One collection pass. Returns the process exit code.
async fn run(cfg: &AppConfig, db: &Db, args: RunArgs) -> anyhow::Result<i32> {
    let workers = args.workers.unwrap_or(cfg.workers).max(1);
    let timeout = args.timeout_secs.map(Duration::from_secs).or(cfg.run_timeout);

    let provider = Arc::new(
        CoinbaseClient::new(cfg.upstream_base_url.clone(), cfg.request_timeout)
            .context("build upstream client")?,
    );
    let store = Arc::new(SqlxCandleStore::new((*db.pool).clone()));
    let registry: Arc<dyn SymbolSource> = Arc::new(SqlxSymbolRepository::new((*db.pool).clone()));
    let symbols = Arc::new(FallbackSymbolSource::new(
        registry,
        StaticSymbols::new(cfg.fallback_symbols.clone()),
    ));

    let orchestrator = CollectionOrchestrator::new(provider, store, symbols, cfg.collector.clone())
        .with_workers(workers);

    let cancel = CancellationToken::new();
    spawn_stop_watcher(cancel.clone(), timeout);

    let summary = orchestrator.run(cancel.clone()).await;
    // releases the watcher
    cancel.cancel();

    print_summary(&summary);
    Ok(summary.status.exit_code())
}

/// Cancels `token` on Ctrl-C or once `timeout` elapses.
fn spawn_stop_watcher(token: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(watch_stop(token, timeout, tokio::signal::ctrl_c()));
}

/// If `interrupt` cannot be registered the timeout still applies.
async fn watch_stop<I>(token: CancellationToken, timeout: Option<Duration>, interrupt: I)
where
    I: Future<Output = std::io::Result<()>>,
{
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupted = async {
        match interrupt.await {
            Ok(()) => warn!("interrupt received; stopping after in-flight windows"),
            Err(e) => {
                error!(error = %e, "cannot listen for interrupt");
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = token.cancelled() => return,
        _ = interrupted => {}
        _ = deadline => {
            warn!(timeout_secs = timeout.map(|d| d.as_secs()), "run timeout reached; stopping after in-flight windows");
        }
    }
    token.cancel();
}

fn print_summary(summary: &RunSummary) {
    println!("run {} finished: {}", summary.trace_id, summary.status);

    if let Some(e) = &summary.source_error {
        println!("  symbol source failed: {e}");
    }
    if let Some(e) = &summary.fatal_error {
        println!("  fatal: {e}");
    }

    for o in &summary.symbols {
        println!(
            "  {:<12} {:<14} windows {}/{} failed {} inserted {} dup {} rejected {}",
            o.symbol,
            o.status,
            o.windows_committed,
            o.windows_planned,
            o.windows_failed(),
            o.candles_inserted,
            o.duplicates,
            o.rejected
        );
        for w in &o.failed_windows {
            println!("      failed {} .. {}: {}", w.start, w.end, w.reason);
        }
        if matches!(o.status, SymbolStatus::Skipped | SymbolStatus::Aborted) {
            if let Some(note) = &o.note {
                println!("      {note}");
            }
        }
    }
}

async fn gaps(cfg: &AppConfig, db: &Db, symbol: &str) -> anyhow::Result<i32> {
    let store = SqlxCandleStore::new((*db.pool).clone());
    let symbol = Symbol::new(symbol.trim().to_uppercase());
    let interval = cfg.collector.interval_minutes;

    let found = store
        .find_gaps(&symbol, interval, DEFAULT_GAP_TOLERANCE)
        .await?;

    if found.is_empty() {
        println!("{symbol} @{interval}m: no gaps");
    }
    for g in &found {
        println!(
            "{symbol} @{interval}m: {} .. {} ({} min)",
            g.after,
            g.before,
            g.duration().num_minutes()
        );
    }
    Ok(0)
}

async fn prune(db: &Db, older_than_days: u32) -> anyhow::Result<i32> {
    let store = SqlxCandleStore::new((*db.pool).clone());
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(older_than_days));

    let removed = store.prune_before(cutoff).await?;
    info!(%cutoff, removed, "pruned historical candles");
    println!("removed {removed} candles older than {cutoff}");
    Ok(0)
}

async fn monitor(db: &Db, symbol: &str, monitored: bool) -> anyhow::Result<i32> {
    let repo = SqlxSymbolRepository::new((*db.pool).clone());
    let code = symbol.trim().to_uppercase();

    match apply_monitor_flag(&repo, symbol, monitored).await? {
        MonitorChange::Enabled => println!("{code} is monitored"),
        MonitorChange::Disabled => println!("{code} is not monitored"),
        MonitorChange::Unknown => println!("{code} is not registered; nothing to change"),
    }
    Ok(0)
}

async fn symbols(db: &Db) -> anyhow::Result<i32> {
    let repo = SqlxSymbolRepository::new((*db.pool).clone());
    for s in repo.list_all().await? {
        println!("{}\t{}", s.code, if s.monitored { "monitored" } else { "-" });
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn broken_interrupt() -> impl Future<Output = io::Result<()>> {
        async { Err(io::Error::other("signal handler unavailable")) }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_still_fires_when_interrupt_cannot_register() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_stop(
            token.clone(),
            Some(Duration::from_secs(30)),
            broken_interrupt(),
        ));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(token.is_cancelled());
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_cancels_the_run() {
        let token = CancellationToken::new();
        watch_stop(token.clone(), None, async { Ok(()) }).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn finished_run_releases_the_watcher() {
        let token = CancellationToken::new();
        token.cancel();
        watch_stop(token.clone(), None, std::future::pending()).await;
        assert!(token.is_cancelled());
    }
}
