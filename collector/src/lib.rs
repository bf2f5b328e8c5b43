pub mod collection;
pub mod config;
pub mod db;
pub mod fallback;
pub mod market;
pub mod metrics;
pub mod planner;
pub mod rate;
pub mod store;
pub mod symbols;

pub mod error;
pub mod time;
