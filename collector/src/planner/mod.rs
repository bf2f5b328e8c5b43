pub mod types;
pub mod windows;

pub use types::{CollectionWindow, Granularity, Plan, PlanKind};
pub use windows::{day_windows, plan};
