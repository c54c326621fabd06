mod error;
mod ground_station;
mod pass_finder;
mod propagation;
mod tle_loader;
mod types;

pub use error::PredictError;
pub use ground_station::GroundStation;
pub use pass_finder::{predict_passes, PassIter};
pub use tle_loader::{ElementSet, ElementSource, TleLoader};
pub use types::{OrbitalElements, Pass};

#[cfg(test)]
pub(crate) use pass_finder::tests as fixtures;
