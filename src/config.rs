use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::predict::GroundStation;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub satellites: Vec<SatelliteConfig>,
    pub reception: ReceptionConfig,
    #[serde(default)]
    pub planning: PlanningConfig,
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub transfer: Option<TransferConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: Option<String>,
    pub coordinates: String,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default)]
    pub horizon_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteConfig {
    pub name: String,
    pub frequency_hz: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceptionConfig {
    pub min_elevation_deg: f64,
    pub gain: f64,
    pub sample_rate: u32,
    #[serde(default)]
    pub frequency_offset_hz: i64,
    #[serde(default = "default_lead_time", deserialize_with = "human_duration")]
    pub lead_time: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_lookahead", deserialize_with = "human_duration")]
    pub lookahead: Duration,
    #[serde(default = "default_poll_interval", deserialize_with = "human_duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_error_retry", deserialize_with = "human_duration")]
    pub error_retry: Duration,
    #[serde(default = "default_replan_interval", deserialize_with = "human_duration")]
    pub replan_interval: Duration,
    #[serde(default = "default_max_element_age", deserialize_with = "human_duration")]
    pub max_element_age: Duration,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            lookahead: default_lookahead(),
            poll_interval: default_poll_interval(),
            error_retry: default_error_retry(),
            replan_interval: default_replan_interval(),
            max_element_age: default_max_element_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoriesConfig {
    pub tle: PathBuf,
    pub audio: PathBuf,
    pub images: PathBuf,
    pub artifacts: PathBuf,
}

/// Argv templates for the external tools. `{name}` placeholders are filled in
/// per invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_capture_command")]
    pub capture: Vec<String>,
    #[serde(default = "default_resample_command")]
    pub resample: Vec<String>,
    #[serde(default = "default_decode_command")]
    pub decode: Vec<String>,
    #[serde(default = "default_enhance_command")]
    pub enhance: Vec<String>,
    #[serde(default = "default_transfer_command")]
    pub transfer: Vec<String>,
    #[serde(default = "default_stop_grace", deserialize_with = "human_duration")]
    pub stop_grace: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            capture: default_capture_command(),
            resample: default_resample_command(),
            decode: default_decode_command(),
            enhance: default_enhance_command(),
            transfer: default_transfer_command(),
            stop_grace: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_resample_rate")]
    pub resample_rate: u32,
    #[serde(default = "default_enhancements")]
    pub enhancements: Vec<String>,
    #[serde(default = "default_true")]
    pub save_raw_audio: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            resample_rate: default_resample_rate(),
            enhancements: default_enhancements(),
            save_raw_audio: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub target: String,
    #[serde(default = "default_transfer_attempts")]
    pub attempts: u32,
    #[serde(default = "default_transfer_backoff", deserialize_with = "human_duration")]
    pub backoff: Duration,
    #[serde(default = "default_transfer_timeout", deserialize_with = "human_duration")]
    pub timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_lead_time() -> Duration {
    Duration::from_secs(120)
}

fn default_lookahead() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_error_retry() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_replan_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_element_age() -> Duration {
    Duration::from_secs(14 * 24 * 3600)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_resample_rate() -> u32 {
    11025
}

fn default_enhancements() -> Vec<String> {
    ["msa", "msa-precip", "hvct", "therm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_transfer_attempts() -> u32 {
    3
}

fn default_transfer_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(30)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_capture_command() -> Vec<String> {
    argv(&[
        "rtl_fm", "-f", "{frequency}", "-s", "{sample_rate}", "-g", "{gain}", "-p", "0", "-E",
        "dc", "-F", "9", "-A", "fast", "{output}",
    ])
}

fn default_resample_command() -> Vec<String> {
    argv(&[
        "sox", "-t", "raw", "-r", "{sample_rate}", "-e", "signed", "-b", "16", "-c", "1",
        "{input}", "-r", "{target_rate}", "{output}",
    ])
}

fn default_decode_command() -> Vec<String> {
    argv(&["noaa-apt", "{input}", "-o", "{output}"])
}

fn default_enhance_command() -> Vec<String> {
    argv(&["noaa-apt", "{input}", "-c", "{enhancement}", "-o", "{output}"])
}

fn default_transfer_command() -> Vec<String> {
    argv(&["scp", "-o", "BatchMode=yes", "{input}", "{target}"])
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.ground_station().is_none() {
            return invalid(format!(
                "station.coordinates: expected \"lat, lon\" in degrees, got {:?}",
                self.station.coordinates
            ));
        }
        if !(-10.0..90.0).contains(&self.station.horizon_deg) {
            return invalid("station.horizon_deg: must be within [-10, 90)".into());
        }

        if self.satellites.is_empty() {
            return invalid("satellites: at least one satellite is required".into());
        }
        let mut names = HashSet::new();
        for sat in &self.satellites {
            if sat.name.trim().is_empty() {
                return invalid("satellites: name must not be empty".into());
            }
            if !names.insert(sat.name.to_ascii_uppercase()) {
                return invalid(format!("satellites: duplicate name {:?}", sat.name));
            }
            if sat.frequency_hz == 0 {
                return invalid(format!("satellites.{}: frequency_hz must be positive", sat.name));
            }
        }

        if !(0.0..90.0).contains(&self.reception.min_elevation_deg) {
            return invalid("reception.min_elevation_deg: must be within [0, 90)".into());
        }
        if self.reception.sample_rate == 0 {
            return invalid("reception.sample_rate: must be positive".into());
        }
        if self.processing.resample_rate == 0 {
            return invalid("processing.resample_rate: must be positive".into());
        }

        if self.planning.lookahead.is_zero() {
            return invalid("planning.lookahead: must be positive".into());
        }
        if self.planning.poll_interval.is_zero() || self.planning.error_retry.is_zero() {
            return invalid("planning: poll_interval and error_retry must be positive".into());
        }
        if self.planning.replan_interval.is_zero() {
            return invalid("planning.replan_interval: must be positive".into());
        }

        let tools = [
            ("capture", &self.tools.capture),
            ("resample", &self.tools.resample),
            ("decode", &self.tools.decode),
            ("enhance", &self.tools.enhance),
            ("transfer", &self.tools.transfer),
        ];
        for (name, command) in tools {
            if command.is_empty() || command[0].trim().is_empty() {
                return invalid(format!("tools.{}: command must not be empty", name));
            }
        }

        if let Some(transfer) = &self.transfer {
            if transfer.target.trim().is_empty() {
                return invalid("transfer.target: must not be empty".into());
            }
            if transfer.attempts == 0 {
                return invalid("transfer.attempts: must be at least 1".into());
            }
        }

        Ok(())
    }

    pub fn ground_station(&self) -> Option<GroundStation> {
        GroundStation::from_coordinates(&self.station.coordinates, Some(self.station.altitude_m))
            .map(|station| station.with_horizon(self.station.horizon_deg))
    }

    pub fn enabled_satellites(&self) -> impl Iterator<Item = &SatelliteConfig> {
        self.satellites.iter().filter(|s| s.enabled)
    }
}
