pub mod orchestrator;
pub mod types;

pub use orchestrator::CollectionOrchestrator;
pub use types::{FailedWindow, RunStatus, RunSummary, SymbolOutcome, SymbolStatus};
