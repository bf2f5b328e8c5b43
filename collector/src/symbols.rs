use std::sync::Arc;

use async_trait::async_trait;

use crate::fallback::{Lookup, first_non_empty};
use crate::market::types::Symbol;
use crate::store::repository::{SymbolRegistry, SymbolSource};

/// A fixed symbol list, e.g. from `CANDLES_SYMBOLS`.
#[derive(Clone, Debug, Default)]
pub struct StaticSymbols {
    symbols: Vec<Symbol>,
}

impl StaticSymbols {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: codes.into_iter().map(Symbol::new).collect(),
        }
    }
}

#[async_trait]
impl SymbolSource for StaticSymbols {
    async fn list_monitored(&self) -> anyhow::Result<Vec<Symbol>> {
        Ok(self.symbols.clone())
    }
}

/// Registry first; the configured list only when the registry has no
/// monitored symbols or cannot be read.
pub struct FallbackSymbolSource {
    primary: Arc<dyn SymbolSource>,
    fallback: StaticSymbols,
}

impl FallbackSymbolSource {
    pub fn new(primary: Arc<dyn SymbolSource>, fallback: StaticSymbols) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SymbolSource for FallbackSymbolSource {
    async fn list_monitored(&self) -> anyhow::Result<Vec<Symbol>> {
        let lookups: Vec<(&'static str, Lookup<'_, Symbol>)> = vec![
            ("registry", self.primary.list_monitored()),
            ("configured", self.fallback.list_monitored()),
        ];
        first_non_empty(lookups).await
    }
}

/// What a monitor request did to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorChange {
    Enabled,
    Disabled,
    /// Disabling a symbol that was never registered.
    Unknown,
}

/// Enabling registers the symbol if needed; disabling only touches
/// symbols already in the registry.
pub async fn apply_monitor_flag(
    registry: &dyn SymbolRegistry,
    code: &str,
    monitored: bool,
) -> anyhow::Result<MonitorChange> {
    if monitored {
        registry.upsert_symbol(code, true).await?;
        return Ok(MonitorChange::Enabled);
    }

    if registry.set_monitored(code, false).await? {
        Ok(MonitorChange::Disabled)
    } else {
        Ok(MonitorChange::Unknown)
    }
}
