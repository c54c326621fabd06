use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use super::conflict::{resolve_conflicts, DroppedPass};
use super::session::{OutputDirs, ScheduledSession};
use crate::config::{Config, ConfigError, SatelliteConfig};
use crate::predict::{predict_passes, ElementSource, GroundStation, Pass, PredictError};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Predict(#[from] PredictError),
}

impl PlanError {
    pub fn is_invalid_elements(&self) -> bool {
        matches!(self, PlanError::Predict(PredictError::InvalidElements { .. }))
    }
}

/// Everything the planner needs from the configuration, resolved once.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub station: GroundStation,
    pub satellites: Vec<SatelliteConfig>,
    pub min_elevation_deg: f64,
    pub lead_time: Duration,
    pub lookahead: Duration,
    pub max_element_age: Duration,
    pub output: OutputDirs,
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let station = config
            .ground_station()
            .ok_or_else(|| ConfigError::Invalid("station.coordinates".into()))?;
        let to_chrono = |name: &str, d: StdDuration| {
            Duration::from_std(d)
                .map_err(|_| ConfigError::Invalid(format!("{}: duration out of range", name)))
        };

        Ok(Self {
            station,
            satellites: config.satellites.clone(),
            min_elevation_deg: config.reception.min_elevation_deg,
            lead_time: to_chrono("reception.lead_time", config.reception.lead_time)?,
            lookahead: to_chrono("planning.lookahead", config.planning.lookahead)?,
            max_element_age: to_chrono("planning.max_element_age", config.planning.max_element_age)?,
            output: OutputDirs {
                audio: config.directories.audio.clone(),
                images: config.directories.images.clone(),
                artifacts: config.directories.artifacts.clone(),
            },
        })
    }
}

/// The resolved timeline for one planning cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub generated_at: DateTime<Utc>,
    pub passes: Vec<Pass>,
    pub dropped: Vec<DroppedPass>,
}

/// Source of the next session to execute. The scheduler loop only sees this.
pub trait SessionPlanner {
    fn next_session(&self, now: DateTime<Utc>) -> Result<Option<ScheduledSession>, PlanError>;
}

pub struct PassPlanner<S> {
    settings: PlannerSettings,
    source: S,
}

impl<S: ElementSource> PassPlanner<S> {
    pub fn new(settings: PlannerSettings, source: S) -> Self {
        Self { settings, source }
    }

    /// Predict every enabled satellite over `lookahead` and resolve receiver
    /// conflicts. Elements are re-read on every call.
    pub fn plan(&self, now: DateTime<Utc>, lookahead: Duration) -> Result<Plan, PlanError> {
        let elements = self.source.load()?;
        let mut candidates = Vec::new();

        for satellite in self.settings.satellites.iter().filter(|s| s.enabled) {
            let Some(block) = elements.find(&satellite.name) else {
                log::warn!("No orbital elements for {}, skipping", satellite.name);
                continue;
            };

            let passes = predict_passes(
                satellite,
                block,
                &self.settings.station,
                now,
                lookahead,
                self.settings.min_elevation_deg,
            )?;

            let age = now - passes.elements_epoch();
            if age > self.settings.max_element_age {
                log::warn!(
                    "Orbital elements for {} are {} days old ({})",
                    satellite.name,
                    age.num_days(),
                    block.source
                );
            }

            for pass in passes {
                candidates.push(pass?);
            }
        }

        let total = candidates.len();
        let resolution = resolve_conflicts(candidates);
        for dropped in &resolution.dropped {
            log::debug!(
                "Dropping {} at {} ({:.1}°): overlaps {} at {} ({:.1}°)",
                dropped.pass.satellite,
                dropped.pass.aos.format("%H:%M:%S"),
                dropped.pass.max_elevation_deg,
                dropped.beaten_by.satellite,
                dropped.beaten_by.aos.format("%H:%M:%S"),
                dropped.beaten_by.max_elevation_deg,
            );
        }
        log::debug!(
            "Planned {} of {} candidate passes",
            resolution.kept.len(),
            total
        );

        Ok(Plan {
            generated_at: now,
            passes: resolution.kept,
            dropped: resolution.dropped,
        })
    }
}

impl<S: ElementSource> SessionPlanner for PassPlanner<S> {
    fn next_session(&self, now: DateTime<Utc>) -> Result<Option<ScheduledSession>, PlanError> {
        let plan = self.plan(now, self.settings.lookahead)?;

        Ok(plan
            .passes
            .into_iter()
            .find(|pass| pass.aos > now)
            .map(|pass| ScheduledSession::new(pass, self.settings.lead_time, &self.settings.output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::fixtures::{epoch, iss_elements, satellite};
    use crate::predict::{ElementSet, OrbitalElements};
    use std::path::PathBuf;

    fn noaa19_elements() -> OrbitalElements {
        OrbitalElements {
            name: "NOAA 19 [+]".to_string(),
            line1: "1 33591U 09005A   20194.51323027  .00000068  00000-0  62229-4 0  9993"
                .to_string(),
            line2: "2 33591  99.1899 199.2093 0013947 297.7015  62.2748 14.12483485587432"
                .to_string(),
            source: "weather.tle".to_string(),
        }
    }

    fn settings(satellites: Vec<SatelliteConfig>) -> PlannerSettings {
        PlannerSettings {
            station: GroundStation::from_coordinates("45.0, 10.0", Some(200.0)).unwrap(),
            satellites,
            min_elevation_deg: 10.0,
            lead_time: Duration::minutes(2),
            lookahead: Duration::hours(24),
            max_element_age: Duration::days(14),
            output: OutputDirs {
                audio: PathBuf::from("/data/audio"),
                images: PathBuf::from("/data/images"),
                artifacts: PathBuf::from("/data/artifacts"),
            },
        }
    }

    fn planner() -> PassPlanner<ElementSet> {
        let mut iss = iss_elements();
        iss.name = "ISS".to_string();
        PassPlanner::new(
            settings(vec![satellite("ISS"), satellite("NOAA 19")]),
            ElementSet::new(vec![iss, noaa19_elements()]),
        )
    }

    #[test]
    fn plan_is_conflict_free_and_ordered() {
        let plan = planner().plan(epoch(), Duration::hours(24)).unwrap();

        assert!(!plan.passes.is_empty());
        assert!(plan.passes.windows(2).all(|w| w[0].los <= w[1].aos));
        for pass in &plan.passes {
            assert!(pass.aos < pass.tca && pass.tca < pass.los);
            assert!(pass.max_elevation_deg >= 10.0);
        }
        for dropped in &plan.dropped {
            assert!(dropped.beaten_by.overlaps(&dropped.pass));
            assert!(dropped.beaten_by.outranks(&dropped.pass));
        }
    }

    #[test]
    fn planning_is_repeatable() {
        let planner = planner();
        let a = planner.plan(epoch(), Duration::hours(24)).unwrap();
        let b = planner.plan(epoch(), Duration::hours(24)).unwrap();
        assert_eq!(a.passes, b.passes);
        assert_eq!(a.dropped, b.dropped);
    }

    #[test]
    fn next_session_is_the_earliest_future_pass() {
        let planner = planner();
        let plan = planner.plan(epoch(), Duration::hours(24)).unwrap();
        let session = planner.next_session(epoch()).unwrap().unwrap();

        assert_eq!(session.pass, plan.passes[0]);
        assert!(session.pass.aos > epoch());
        assert_eq!(session.lead_time, Duration::minutes(2));
        assert_eq!(session.arm_at(), session.pass.aos - Duration::minutes(2));
        assert!(session.output_id.starts_with(&session.pass.satellite.replace(' ', "_")));
    }

    #[test]
    fn next_session_moves_on_as_time_advances() {
        let planner = planner();
        let first = planner.next_session(epoch()).unwrap().unwrap();
        let second = planner.next_session(first.pass.tca).unwrap().unwrap();

        assert!(second.pass.aos > first.pass.tca);
        assert!(!second.is_same_pass(&first));
    }

    #[test]
    fn replanning_recognises_the_same_pass() {
        let planner = planner();
        let first = planner.next_session(epoch()).unwrap().unwrap();

        let until_aos = first.pass.aos - epoch();
        for (quarter, jitter_ms) in [(1, 123), (2, 777), (3, 456)] {
            let now = epoch() + until_aos * quarter / 4 + Duration::milliseconds(jitter_ms);
            assert!(now < first.pass.aos);
            let again = planner.next_session(now).unwrap().unwrap();
            assert!(
                again.is_same_pass(&first),
                "{} at {} vs {}",
                again.pass.satellite,
                again.pass.aos,
                first.pass.aos
            );
        }
    }

    #[test]
    fn stale_elements_still_produce_passes() {
        let mut iss = iss_elements();
        iss.name = "ISS".to_string();
        let planner = PassPlanner::new(
            settings(vec![satellite("ISS")]),
            ElementSet::new(vec![iss]),
        );
        let now = epoch() + Duration::days(30);
        assert!(now - planner.settings.max_element_age > epoch());

        let plan = planner.plan(now, Duration::hours(24)).unwrap();
        assert!(!plan.passes.is_empty());
        assert!(plan.passes.iter().all(|p| p.aos >= now));
        assert!(planner.next_session(now).unwrap().is_some());
    }

    #[test]
    fn disabled_and_unknown_satellites_are_ignored() {
        let mut disabled = satellite("ISS");
        disabled.enabled = false;
        let planner = PassPlanner::new(
            settings(vec![disabled, satellite("METEOR-M 2")]),
            ElementSet::new(vec![iss_elements()]),
        );

        let plan = planner.plan(epoch(), Duration::hours(24)).unwrap();
        assert!(plan.passes.is_empty());
        assert!(planner.next_session(epoch()).unwrap().is_none());
    }

    #[test]
    fn broken_elements_abort_the_cycle() {
        let mut broken = noaa19_elements();
        broken.line1 = "1 33591U 09005A   not a tle".to_string();
        let mut iss = iss_elements();
        iss.name = "ISS".to_string();
        let planner = PassPlanner::new(
            settings(vec![satellite("ISS"), satellite("NOAA 19")]),
            ElementSet::new(vec![iss, broken]),
        );

        let err = planner.next_session(epoch()).unwrap_err();
        assert!(err.is_invalid_elements());
    }
}
