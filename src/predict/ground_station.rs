use serde::Serialize;

/// Ground station location. Loaded once from configuration and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroundStation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    /// Local horizon mask; AOS and LOS are crossings of this elevation.
    pub horizon_deg: f64,
}

impl Default for GroundStation {
    fn default() -> Self {
        Self {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_m: 0.0,
            horizon_deg: 0.0,
        }
    }
}

impl GroundStation {
    /// Parses `"lat, lon"` in decimal degrees.
    pub fn from_coordinates(coordinates: &str, altitude_m: Option<f64>) -> Option<Self> {
        let parts: Vec<_> = coordinates.split(',').map(|s| s.trim()).collect();
        if parts.len() != 2 {
            return None;
        }
        let lat: f64 = parts[0].parse().ok()?;
        let lon: f64 = parts[1].parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self {
            latitude_deg: lat,
            longitude_deg: lon,
            altitude_m: altitude_m.unwrap_or(0.0),
            horizon_deg: 0.0,
        })
    }

    pub fn with_horizon(mut self, horizon_deg: f64) -> Self {
        self.horizon_deg = horizon_deg;
        self
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        // WGS-84 constants
        let a = 6378.137;
        let e2 = 0.00669437999014;
        let lat = self.lat_rad();
        let lon = self.lon_rad();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let alt_km = self.altitude_m / 1000.0;
        let x = (n + alt_km) * cos_lat * lon.cos();
        let y = (n + alt_km) * cos_lat * lon.sin();
        let z = (n * (1.0 - e2) + alt_km) * sin_lat;
        [x, y, z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        let station = GroundStation::from_coordinates("52.52, 13.405", Some(34.0)).unwrap();
        assert_eq!(station.latitude_deg, 52.52);
        assert_eq!(station.longitude_deg, 13.405);
        assert_eq!(station.altitude_m, 34.0);
        assert_eq!(station.horizon_deg, 0.0);
    }

    #[test]
    fn rejects_malformed_or_out_of_range_coordinates() {
        assert!(GroundStation::from_coordinates("52.52", None).is_none());
        assert!(GroundStation::from_coordinates("north, east", None).is_none());
        assert!(GroundStation::from_coordinates("91.0, 10.0", None).is_none());
        assert!(GroundStation::from_coordinates("10.0, 181.0", None).is_none());
    }

    #[test]
    fn equator_station_sits_on_the_x_axis() {
        let pos = GroundStation::default().position_ecef_km();
        assert!((pos[0] - 6378.137).abs() < 1e-9);
        assert!(pos[1].abs() < 1e-9);
        assert!(pos[2].abs() < 1e-9);
    }
}
