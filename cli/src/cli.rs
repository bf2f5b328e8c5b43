use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "candles", version, about = "Historical candle collector")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one collection pass over all monitored symbols
    Run(RunArgs),

    /// Print stored gaps for a symbol at the configured interval
    Gaps {
        symbol: String,
    },

    /// Delete stored candles older than the given age
    Prune {
        #[clap(long)]
        older_than_days: u32,
    },

    /// Register a symbol and flag it for collection
    Monitor {
        symbol: String,

        /// Clear the monitored flag instead of setting it
        #[clap(long)]
        off: bool,
    },

    /// List registered symbols and their monitored flag
    Symbols,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Symbols collected concurrently (overrides CANDLES_WORKERS)
    #[clap(long)]
    pub workers: Option<usize>,

    /// Stop between windows after this many seconds (overrides CANDLES_RUN_TIMEOUT_SECS)
    #[clap(long)]
    pub timeout_secs: Option<u64>,
}
