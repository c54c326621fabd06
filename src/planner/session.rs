use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::predict::Pass;

/// Where a session's products land.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDirs {
    pub audio: PathBuf,
    pub images: PathBuf,
    pub artifacts: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub raw_audio: PathBuf,
    pub resampled_audio: PathBuf,
    pub image: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl SessionPaths {
    fn derive(output_id: &str, dirs: &OutputDirs) -> Self {
        Self {
            raw_audio: dirs.audio.join(format!("{}.wav", output_id)),
            resampled_audio: dirs.audio.join(format!("{}_resampled.wav", output_id)),
            image: dirs.images.join(format!("{}.png", output_id)),
            artifacts_dir: dirs.artifacts.join(output_id),
        }
    }

    /// `NOAA_19_20261018_100000_MSA-PRECIP.png` next to the primary image.
    pub fn enhanced_image(&self, enhancement: &str) -> PathBuf {
        let stem = self
            .image
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        self.image
            .with_file_name(format!("{}_{}.png", stem, enhancement.to_ascii_uppercase()))
    }

    /// Decoder output goes here first and is renamed only on success.
    pub fn partial(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".partial");
        path.with_file_name(name)
    }
}

/// A pass picked for execution. Lives until its CaptureSession reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSession {
    pub id: Uuid,
    pub pass: Pass,
    pub lead_time: Duration,
    pub output_id: String,
    pub paths: SessionPaths,
}

impl ScheduledSession {
    pub fn new(pass: Pass, lead_time: Duration, dirs: &OutputDirs) -> Self {
        let output_id = output_id(&pass.satellite, pass.aos);
        let paths = SessionPaths::derive(&output_id, dirs);
        Self {
            id: Uuid::new_v4(),
            pass,
            lead_time,
            output_id,
            paths,
        }
    }

    /// When the hardware must be ready.
    pub fn arm_at(&self) -> DateTime<Utc> {
        self.pass.aos - self.lead_time
    }

    pub fn capture_duration(&self) -> Duration {
        self.pass.duration()
    }

    /// Same satellite with overlapping windows. Re-planning refines AOS/LOS
    /// from a different scan grid, so exact times and ids differ between cycles.
    pub fn is_same_pass(&self, other: &ScheduledSession) -> bool {
        self.pass.satellite == other.pass.satellite && self.pass.overlaps(&other.pass)
    }
}

fn output_id(satellite: &str, aos: DateTime<Utc>) -> String {
    let name: String = satellite
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let name = name
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    format!("{}_{}", name, aos.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::conflict::tests::{at, pass};

    fn dirs() -> OutputDirs {
        OutputDirs {
            audio: PathBuf::from("/data/audio"),
            images: PathBuf::from("/data/images"),
            artifacts: PathBuf::from("/data/artifacts"),
        }
    }

    #[test]
    fn derives_identifier_and_paths() {
        let session = ScheduledSession::new(
            pass("NOAA 19", at(10, 3), at(10, 11), 62.0),
            Duration::minutes(2),
            &dirs(),
        );

        assert_eq!(session.output_id, "NOAA_19_20261018_100300");
        assert_eq!(
            session.paths.raw_audio,
            PathBuf::from("/data/audio/NOAA_19_20261018_100300.wav")
        );
        assert_eq!(
            session.paths.resampled_audio,
            PathBuf::from("/data/audio/NOAA_19_20261018_100300_resampled.wav")
        );
        assert_eq!(
            session.paths.image,
            PathBuf::from("/data/images/NOAA_19_20261018_100300.png")
        );
        assert_eq!(
            session.paths.enhanced_image("msa-precip"),
            PathBuf::from("/data/images/NOAA_19_20261018_100300_MSA-PRECIP.png")
        );
        assert_eq!(
            SessionPaths::partial(&session.paths.image),
            PathBuf::from("/data/images/NOAA_19_20261018_100300.png.partial")
        );
        assert_eq!(session.arm_at(), at(10, 1));
        assert_eq!(session.capture_duration(), Duration::minutes(8));
    }

    #[test]
    fn odd_characters_are_flattened() {
        assert_eq!(output_id("METEOR-M 2 [+]", at(0, 0)), "METEOR-M_2_20261018_000000");
    }

    #[test]
    fn same_pass_ignores_session_id() {
        let p = pass("NOAA 15", at(9, 0), at(9, 9), 33.0);
        let a = ScheduledSession::new(p.clone(), Duration::minutes(2), &dirs());
        let b = ScheduledSession::new(p, Duration::minutes(1), &dirs());
        assert_ne!(a.id, b.id);
        assert!(a.is_same_pass(&b));
    }

    #[test]
    fn same_pass_tolerates_refined_times() {
        let first = pass("NOAA 15", at(9, 0), at(9, 9), 33.0);
        let mut refined = first.clone();
        refined.aos = first.aos + Duration::milliseconds(-123);
        refined.los = first.los + Duration::milliseconds(877);

        let a = ScheduledSession::new(first.clone(), Duration::minutes(2), &dirs());
        let b = ScheduledSession::new(refined, Duration::minutes(2), &dirs());
        assert!(a.is_same_pass(&b));

        let other_satellite = ScheduledSession::new(
            pass("NOAA 18", at(9, 0), at(9, 9), 33.0),
            Duration::minutes(2),
            &dirs(),
        );
        let next_orbit = ScheduledSession::new(
            pass("NOAA 15", at(10, 41), at(10, 50), 20.0),
            Duration::minutes(2),
            &dirs(),
        );
        assert!(!a.is_same_pass(&other_satellite));
        assert!(!a.is_same_pass(&next_orbit));
    }
}
