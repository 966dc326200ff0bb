//! Configuration structures for the lightpen driver.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::error::{LightpenError, LightpenResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default period constant: microseconds per PAL video line.
pub const DEFAULT_LINE_LENGTH_US: u32 = 64;

/// Default debounce guard between accepted pulse edges.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_micros(128);

/// Top-level driver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Input line binding for the lightpen device.
    pub lines: LineConfig,

    /// Timing decode constants.
    pub timing: TimingConfig,

    /// Raw timestamp device configuration.
    pub timestamp: TimestampConfig,

    /// Companion speed measurement configuration.
    pub speedometer: SpeedometerConfig,

    /// Simulated edge source configuration.
    pub simulation: SimulationConfig,
}

/// Line identifiers bound to the lightpen device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Pulse (light sensor) line.
    pub pulse: u32,

    /// Reference (vertical sync) line.
    pub reference: u32,

    /// Auxiliary input sampled on accepted pulses (pen button).
    pub button: u32,

    /// Auxiliary input gating the eligible half-cycle (odd/even field).
    pub odd_even: u32,

    /// Exclusive upper bound for valid line identifiers.
    pub max_line: u32,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            pulse: 17,
            reference: 27,
            button: 22,
            odd_even: 23,
            max_line: 54,
        }
    }
}

/// Timing decode constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Period constant used to split an offset into (major, minor), in microseconds.
    pub line_length: u32,

    /// Minimum spacing between accepted pulse edges.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            line_length: DEFAULT_LINE_LENGTH_US,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl TimingConfig {
    /// Debounce threshold in whole microseconds.
    #[must_use]
    pub fn debounce_us(&self) -> i64 {
        i64::try_from(self.debounce.as_micros()).unwrap_or(i64::MAX)
    }
}

/// Raw timestamp device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// One line per timestamp channel, in channel order.
    pub lines: Vec<u32>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            lines: vec![5, 6, 13, 19],
        }
    }
}

/// Companion speed measurement configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedometerConfig {
    /// Distance travelled between the two sensors of a pair, in kilometres.
    pub distance_km: f64,

    /// Bounded wait for the multiplexed poll; a timeout means "no event yet".
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
}

impl Default for SpeedometerConfig {
    fn default() -> Self {
        Self {
            distance_km: 0.000_25,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

/// Simulated edge source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time between reference (frame sync) edges.
    #[serde(with = "humantime_serde")]
    pub frame_period: Duration,

    /// Video line under the pen.
    pub pen_line: u32,

    /// Offset within the line under the pen, in microseconds.
    pub pen_column: u32,

    /// Pen button held down.
    pub button: bool,

    /// Extra bounce edges emitted right after each pen pulse.
    pub bounce_edges: u32,

    /// Interval between the two sensors of each timestamp pair.
    #[serde(with = "humantime_serde")]
    pub wheel_interval: Duration,

    /// Time between wheel revolutions.
    #[serde(with = "humantime_serde")]
    pub wheel_period: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_period: Duration::from_millis(20),
            pen_line: 100,
            pen_column: 20,
            button: false,
            bounce_edges: 0,
            wheel_interval: Duration::from_micros(300),
            wheel_period: Duration::from_millis(50),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section: both devices plus the speed measurement loop.
    ///
    /// # Errors
    ///
    /// The first failure from [`validate_lightpen`](Self::validate_lightpen),
    /// [`validate_timestamp`](Self::validate_timestamp), or
    /// [`LightpenError::Config`] for a non-positive speedometer distance.
    pub fn validate(&self) -> LightpenResult<()> {
        self.validate_lightpen()?;
        self.validate_timestamp()?;
        if !(self.speedometer.distance_km.is_finite() && self.speedometer.distance_km > 0.0) {
            return Err(LightpenError::Config(
                "speedometer distance_km must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Bind checks for the lightpen device: `[lines]` and `[timing]`.
    ///
    /// # Errors
    ///
    /// Returns [`LightpenError::InvalidLine`] for an out-of-range or duplicated line
    /// and [`LightpenError::Config`] for unusable timing constants.
    pub fn validate_lightpen(&self) -> LightpenResult<()> {
        let lines = &self.lines;
        let named = [
            (lines.pulse, "pulse"),
            (lines.reference, "reference"),
            (lines.button, "button"),
            (lines.odd_even, "odd/even"),
        ];

        let mut seen = HashSet::new();
        for (line, purpose) in named {
            if line >= lines.max_line || !seen.insert(line) {
                return Err(LightpenError::InvalidLine {
                    line,
                    purpose: purpose.to_string(),
                });
            }
        }

        if self.timing.line_length == 0 {
            return Err(LightpenError::Config("line_length must be non-zero".into()));
        }
        Ok(())
    }

    /// Bind checks for the timestamp device: `[timestamp]` against `max_line`.
    ///
    /// # Errors
    ///
    /// [`LightpenError::Config`] for an odd or too small line count and
    /// [`LightpenError::InvalidLine`] for an out-of-range or duplicated line.
    pub fn validate_timestamp(&self) -> LightpenResult<()> {
        let ts_lines = &self.timestamp.lines;
        if ts_lines.len() < 2 || ts_lines.len() % 2 != 0 {
            return Err(LightpenError::Config(format!(
                "timestamp device needs an even number of lines (at least 2), got {}",
                ts_lines.len()
            )));
        }
        let mut seen = HashSet::new();
        for (index, &line) in ts_lines.iter().enumerate() {
            if line >= self.lines.max_line || !seen.insert(line) {
                return Err(LightpenError::InvalidLine {
                    line,
                    purpose: format!("timestamp channel {index}"),
                });
            }
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
