pub mod client;
pub mod types;

pub use client::CoinbaseClient;
pub use types::*;
