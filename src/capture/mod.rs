mod artifacts;
mod process;
mod session;
mod state;
mod tools;

pub use artifacts::SessionLog;
pub use session::{CaptureError, CaptureSession, CaptureSettings, TransferSettings};
pub use state::{FailureReason, SessionState};
pub use tools::{ProcessToolchain, ToolError, Toolchain};
