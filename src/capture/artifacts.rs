use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::capture::state::{SessionState, Transition};
use crate::planner::ScheduledSession;

pub const SESSION_LOG_FILE: &str = "session_log.yaml";

/// What happened to one session. Rewritten into the session's artifacts
/// directory after every transition and returned once the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionLog {
    pub session_id: Uuid,
    pub output_id: String,
    pub satellite: String,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elevation_deg: f64,
    pub state: SessionState,
    pub transitions: Vec<Transition>,
    pub transfer_attempts: u32,
    pub image: Option<PathBuf>,
    pub extra_images: Vec<PathBuf>,
    pub delivered: bool,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionLog {
    pub fn new(session: &ScheduledSession) -> Self {
        Self {
            session_id: session.id,
            output_id: session.output_id.clone(),
            satellite: session.pass.satellite.clone(),
            aos: session.pass.aos,
            los: session.pass.los,
            max_elevation_deg: session.pass.max_elevation_deg,
            state: SessionState::Idle,
            transitions: Vec::new(),
            transfer_attempts: 0,
            image: None,
            extra_images: Vec::new(),
            delivered: false,
            error: None,
            completed_at: None,
        }
    }

    pub fn save(&self, artifacts_dir: &Path) -> io::Result<()> {
        fs::write(
            artifacts_dir.join(SESSION_LOG_FILE),
            serde_yaml::to_string(self)
                .map_err(|e| io::Error::other(format!("Failed to serialize log: {}", e)))?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::{scheduled, temp_dir};

    #[test]
    fn writes_yaml_log() {
        let dir = temp_dir();
        let session = scheduled(&dir, chrono::Duration::seconds(1));
        let mut log = SessionLog::new(&session);
        log.transitions.push(Transition {
            from: SessionState::Idle,
            to: SessionState::Armed,
            at: Utc::now(),
        });
        log.state = SessionState::Armed;

        log.save(&dir).unwrap();

        let yaml = fs::read_to_string(dir.join(SESSION_LOG_FILE)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["state"].as_str(), Some("Armed"));
        assert_eq!(value["satellite"].as_str(), Some("NOAA 19"));
        assert_eq!(value["transitions"][0]["to"].as_str(), Some("Armed"));
        assert_eq!(
            value["session_id"].as_str(),
            Some(session.id.to_string().as_str())
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
