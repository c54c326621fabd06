use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sgp4::{Constants, Elements};

use crate::predict::error::PredictError;

/// A named two-line element block as read from disk. Parsing is deferred to
/// propagation time so that a broken block surfaces as `InvalidElements` in
/// the planning cycle that uses it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitalElements {
    pub name: String,
    pub line1: String,
    pub line2: String,
    pub source: String,
}

impl OrbitalElements {
    pub fn parse(&self) -> Result<ParsedElements, PredictError> {
        let invalid = |message: String| PredictError::InvalidElements {
            satellite: self.name.clone(),
            message,
        };

        let elements = Elements::from_tle(
            Some(self.name.clone()),
            self.line1.as_bytes(),
            self.line2.as_bytes(),
        )
        .map_err(|e| invalid(e.to_string()))?;
        let constants = Constants::from_elements(&elements).map_err(|e| invalid(e.to_string()))?;

        Ok(ParsedElements {
            elements,
            constants,
        })
    }
}

pub struct ParsedElements {
    pub elements: Elements,
    pub constants: Constants,
}

impl ParsedElements {
    pub fn norad_id(&self) -> u32 {
        self.elements.norad_id as u32
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.elements.datetime.and_utc()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.epoch()
    }
}

/// A predicted satellite pass. `aos < tca < los` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pass {
    pub satellite: String,
    pub norad_id: u32,
    pub frequency_hz: u64,
    pub aos: DateTime<Utc>,
    pub tca: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elevation_deg: f64,
    pub aos_azimuth_deg: f64,
    pub los_azimuth_deg: f64,
}

impl Pass {
    pub fn duration(&self) -> Duration {
        self.los - self.aos
    }

    /// Two passes overlap if `[aos, los]` intervals intersect.
    pub fn overlaps(&self, other: &Pass) -> bool {
        self.aos < other.los && other.aos < self.los
    }

    /// Whether this pass wins the receiver over `other`: higher peak elevation,
    /// or equal peak and earlier AOS. Satellite name settles exact ties.
    pub fn outranks(&self, other: &Pass) -> bool {
        self.max_elevation_deg
            .total_cmp(&other.max_elevation_deg)
            .then_with(|| other.aos.cmp(&self.aos))
            .then_with(|| other.satellite.cmp(&self.satellite))
            .is_gt()
    }
}
