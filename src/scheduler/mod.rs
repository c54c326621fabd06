pub mod runner;
pub mod wait;

pub use runner::{RunSummary, Runner, RunnerError, RunnerSettings};
