use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::Display;

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum FailureReason {
    /// Capture tool missing, device busy, or it died before LOS.
    DeviceUnavailable,
    EmptyCapture,
    DecodeFailed,
    /// Every delivery attempt failed; the image stays on disk.
    TransferFailed,
    /// Shutdown raised before recording started.
    CancelledWhileWaiting,
    /// Shutdown raised while an external tool was running.
    Cancelled,
    /// Output directories could not be prepared.
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum SessionState {
    Idle,
    Armed,
    Recording,
    Decoding,
    Transferring,
    Done,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }

    /// Legal edges of the capture state machine.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Armed)
            | (Armed, Recording)
            | (Recording, Decoding)
            | (Decoding, Transferring)
            | (Transferring, Done) => true,
            (current, Failed(_)) => !current.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}
