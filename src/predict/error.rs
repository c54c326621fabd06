use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("TLE directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("TLE file read error: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Invalid orbital elements for {satellite}: {message}")]
    InvalidElements { satellite: String, message: String },
    #[error("Prediction horizon must be positive, got {0}")]
    InvalidHorizon(chrono::Duration),
    #[error("Propagation error: {0}")]
    Propagation(String),
}
