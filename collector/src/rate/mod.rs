pub mod controller;
pub mod policy;

pub use controller::{RateController, RateState};
pub use policy::RetryPolicy;
