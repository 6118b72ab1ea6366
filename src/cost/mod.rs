pub mod governor;
pub mod tracker;

pub use governor::{BudgetStatus, Governor};
pub use tracker::{StepUsage, Tracker, TrackerSnapshot, Usage};
