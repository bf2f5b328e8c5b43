pub mod coinbase;
pub mod errors;
pub mod normalizer;
pub mod provider;
pub mod types;

pub use errors::UpstreamError;
pub use provider::CandleProvider;
pub use types::{Candle, RawCandle, Symbol};
