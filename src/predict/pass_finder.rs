use chrono::{DateTime, Duration, Utc};

use crate::config::SatelliteConfig;
use crate::predict::error::PredictError;
use crate::predict::propagation::{look_angles, LookAngles};
use crate::predict::types::{OrbitalElements, ParsedElements, Pass};
use crate::predict::GroundStation;

const COARSE_STEP_SECONDS: i64 = 30; // short enough to never step over a 4 minute pass
const FINE_STEP_SECONDS: i64 = 1;
const MAX_OVERRUN_SECONDS: i64 = 3600;

/// Find all passes of `satellite` whose AOS lies in `(from, from + horizon]`.
///
/// The returned iterator propagates lazily; every call starts from scratch so
/// the same inputs always produce the same sequence. A pass already in
/// progress at `from` is skipped. A pass that starts inside the horizon is
/// followed past its end so LOS is never truncated.
pub fn predict_passes(
    satellite: &SatelliteConfig,
    elements: &OrbitalElements,
    station: &GroundStation,
    from: DateTime<Utc>,
    horizon: Duration,
    min_elevation: f64,
) -> Result<PassIter, PredictError> {
    if horizon <= Duration::zero() {
        return Err(PredictError::InvalidHorizon(horizon));
    }
    let parsed = elements.parse()?;

    Ok(PassIter {
        station: *station,
        satellite: satellite.name.clone(),
        frequency_hz: satellite.frequency_hz,
        norad_id: parsed.norad_id(),
        parsed,
        cursor: from,
        end: from + horizon,
        min_elevation,
        prev_visible: None,
        done: false,
    })
}

pub struct PassIter {
    station: GroundStation,
    parsed: ParsedElements,
    satellite: String,
    frequency_hz: u64,
    norad_id: u32,
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    min_elevation: f64,
    prev_visible: Option<bool>,
    done: bool,
}

impl Iterator for PassIter {
    type Item = Result<Pass, PredictError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.scan() {
            Ok(Some(pass)) => Some(Ok(pass)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl PassIter {
    /// Epoch of the elements driving this prediction.
    pub fn elements_epoch(&self) -> DateTime<Utc> {
        self.parsed.epoch()
    }

    fn step() -> Duration {
        Duration::seconds(COARSE_STEP_SECONDS)
    }

    fn sample(&self, at: DateTime<Utc>) -> Result<LookAngles, PredictError> {
        look_angles(&self.station, &self.parsed, at)
    }

    fn is_visible(&self, angles: &LookAngles) -> bool {
        angles.elevation_deg >= self.station.horizon_deg
    }

    /// Advance to the next rising edge and return the pass it starts, if it
    /// clears the minimum elevation.
    fn scan(&mut self) -> Result<Option<Pass>, PredictError> {
        if self.prev_visible.is_none() {
            let first = self.sample(self.cursor)?;
            self.prev_visible = Some(self.is_visible(&first));
            self.cursor += Self::step();
        }

        while self.cursor <= self.end {
            let sample = self.sample(self.cursor)?;
            let visible = self.is_visible(&sample);
            let was_visible = self.prev_visible.unwrap_or(false);
            self.prev_visible = Some(visible);

            if visible && !was_visible {
                let rise_window = (self.cursor - Self::step(), self.cursor);
                if let Some(pass) = self.follow_pass(rise_window, sample)? {
                    if pass.max_elevation_deg >= self.min_elevation {
                        return Ok(Some(pass));
                    }
                }
                continue;
            }

            self.cursor += Self::step();
        }

        Ok(None)
    }

    /// Track a pass from its rising edge to LOS. Leaves the cursor on the
    /// first sample after LOS.
    fn follow_pass(
        &mut self,
        rise_window: (DateTime<Utc>, DateTime<Utc>),
        first: LookAngles,
    ) -> Result<Option<Pass>, PredictError> {
        let (aos, aos_azimuth) = self.refine_crossing(rise_window.0, rise_window.1, true)?;
        let limit = self.end + Duration::seconds(MAX_OVERRUN_SECONDS);

        let mut max_el = first.elevation_deg;
        let mut max_el_time = self.cursor;

        loop {
            self.cursor += Self::step();
            if self.cursor > limit {
                // never set inside the overrun window; not a usable pass
                self.prev_visible = Some(true);
                return Ok(None);
            }

            let sample = self.sample(self.cursor)?;
            if self.is_visible(&sample) {
                if sample.elevation_deg > max_el {
                    max_el = sample.elevation_deg;
                    max_el_time = self.cursor;
                }
                continue;
            }

            let (los, los_azimuth) =
                self.refine_crossing(self.cursor - Self::step(), self.cursor, false)?;
            self.prev_visible = Some(false);
            self.cursor += Self::step();

            if (los - aos).num_seconds() < 2 * FINE_STEP_SECONDS {
                return Ok(None);
            }

            let (mut tca, peak) = self.refine_peak(
                (max_el_time - Self::step()).max(aos),
                (max_el_time + Self::step()).min(los),
            )?;
            if tca <= aos || tca >= los {
                tca = aos + (los - aos) / 2;
            }

            return Ok(Some(Pass {
                satellite: self.satellite.clone(),
                norad_id: self.norad_id,
                frequency_hz: self.frequency_hz,
                aos,
                tca,
                los,
                max_elevation_deg: peak.max(max_el),
                aos_azimuth_deg: round2(aos_azimuth),
                los_azimuth_deg: round2(los_azimuth),
            }));
        }
    }

    /// Binary search to find exact horizon crossing time
    fn refine_crossing(
        &self,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
        is_aos: bool, // true = rising, false = setting
    ) -> Result<(DateTime<Utc>, f64), PredictError> {
        let mut low = before;
        let mut high = after;

        while (high - low).num_seconds() > FINE_STEP_SECONDS {
            let mid = low + (high - low) / 2;
            let above = self.is_visible(&self.sample(mid)?);
            if above == is_aos {
                high = mid;
            } else {
                low = mid;
            }
        }

        // AOS is the first visible instant, LOS the last one
        let crossing = if is_aos { high } else { low };
        let final_sample = self.sample(crossing)?;
        Ok((crossing, final_sample.azimuth_deg))
    }

    /// Ternary search for the elevation maximum inside `[low, high]`.
    fn refine_peak(
        &self,
        mut low: DateTime<Utc>,
        mut high: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, f64), PredictError> {
        while (high - low).num_seconds() > 2 * FINE_STEP_SECONDS {
            let third = (high - low) / 3;
            let m1 = low + third;
            let m2 = high - third;
            if self.sample(m1)?.elevation_deg < self.sample(m2)?.elevation_deg {
                low = m1;
            } else {
                high = m2;
            }
        }

        let tca = low + (high - low) / 2;
        Ok((tca, self.sample(tca)?.elevation_deg))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn iss_elements() -> OrbitalElements {
        OrbitalElements {
            name: "ISS (ZARYA)".to_string(),
            line1: "1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992"
                .to_string(),
            line2: "2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008"
                .to_string(),
            source: "test.tle".to_string(),
        }
    }

    pub(crate) fn satellite(name: &str) -> SatelliteConfig {
        SatelliteConfig {
            name: name.to_string(),
            frequency_hz: 145_800_000,
            enabled: true,
        }
    }

    pub(crate) fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 7, 13, 0, 0, 0).unwrap()
    }

    fn mid_latitude_station() -> GroundStation {
        GroundStation::from_coordinates("45.0, 10.0", Some(200.0)).unwrap()
    }

    fn collect(iter: PassIter) -> Vec<Pass> {
        iter.collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn passes_satisfy_ordering_and_threshold() {
        let iter = predict_passes(
            &satellite("ISS"),
            &iss_elements(),
            &mid_latitude_station(),
            epoch(),
            Duration::hours(24),
            10.0,
        )
        .unwrap();
        let passes = collect(iter);

        assert!(!passes.is_empty());
        for pass in &passes {
            assert!(pass.aos < pass.tca, "{:?}", pass);
            assert!(pass.tca < pass.los, "{:?}", pass);
            assert!(pass.max_elevation_deg >= 10.0);
            assert!(pass.duration() > Duration::minutes(1));
            assert!(pass.duration() < Duration::minutes(20));
            assert_eq!(pass.satellite, "ISS");
            assert_eq!(pass.norad_id, 25544);
        }
        assert!(passes.windows(2).all(|w| w[0].aos < w[1].aos));
        assert!(passes.windows(2).all(|w| w[0].los < w[1].aos));
    }

    #[test]
    fn prediction_is_idempotent() {
        let run = || {
            collect(
                predict_passes(
                    &satellite("ISS"),
                    &iss_elements(),
                    &mid_latitude_station(),
                    epoch(),
                    Duration::hours(12),
                    0.0,
                )
                .unwrap(),
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn higher_threshold_yields_a_subset() {
        let all = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                epoch(),
                Duration::hours(24),
                0.0,
            )
            .unwrap(),
        );
        let high = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                epoch(),
                Duration::hours(24),
                30.0,
            )
            .unwrap(),
        );

        assert!(high.len() <= all.len());
        for pass in &high {
            assert!(all.contains(pass));
        }
    }

    #[test]
    fn threshold_equal_to_peak_is_included() {
        let all = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                epoch(),
                Duration::hours(24),
                0.0,
            )
            .unwrap(),
        );
        let target = all
            .iter()
            .max_by(|a, b| a.max_elevation_deg.total_cmp(&b.max_elevation_deg))
            .unwrap();

        let at_threshold = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                epoch(),
                Duration::hours(24),
                target.max_elevation_deg,
            )
            .unwrap(),
        );
        assert!(at_threshold.contains(target));
    }

    #[test]
    fn pass_in_progress_at_start_is_excluded() {
        let all = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                epoch(),
                Duration::hours(24),
                0.0,
            )
            .unwrap(),
        );
        let first = &all[0];
        let from = first.tca;

        let later = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &mid_latitude_station(),
                from,
                Duration::hours(24),
                0.0,
            )
            .unwrap(),
        );
        assert!(later.iter().all(|p| p.aos > from));
        assert!(!later.iter().any(|p| p.aos == first.aos));
    }

    #[test]
    fn non_rising_satellite_yields_empty_sequence() {
        let south_pole = GroundStation::from_coordinates("-89.9, 0.0", None).unwrap();
        let passes = collect(
            predict_passes(
                &satellite("ISS"),
                &iss_elements(),
                &south_pole,
                epoch(),
                Duration::hours(24),
                0.0,
            )
            .unwrap(),
        );
        assert!(passes.is_empty());
    }

    #[test]
    fn invalid_elements_are_rejected() {
        let mut broken = iss_elements();
        broken.line2 = "2 25544  garbage".to_string();
        let result = predict_passes(
            &satellite("ISS"),
            &broken,
            &mid_latitude_station(),
            epoch(),
            Duration::hours(24),
            0.0,
        );
        assert!(matches!(
            result,
            Err(PredictError::InvalidElements { .. })
        ));
    }

    #[test]
    fn non_positive_horizon_is_rejected() {
        let result = predict_passes(
            &satellite("ISS"),
            &iss_elements(),
            &mid_latitude_station(),
            epoch(),
            Duration::zero(),
            0.0,
        );
        assert!(matches!(result, Err(PredictError::InvalidHorizon(_))));
    }
}
