pub mod repository;
pub mod repository_sqlx;

pub use repository::{
    CandleStore, CommitReport, DEFAULT_GAP_TOLERANCE, Gap, SymbolRegistry, SymbolSource,
};
pub use repository_sqlx::{SqlxCandleStore, SqlxSymbolRepository};
