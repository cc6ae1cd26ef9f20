//! MCM3000 configuration.
//!
//! Loaded from TOML with Figment, with `MCM3000_`-prefixed environment
//! variables layered on top (e.g. `MCM3000_PORT=/dev/ttyUSB1`).
//!
//! ```toml
//! port = "auto"
//! timeout = "5s"
//! move_timeout = "10s"
//!
//! [[axes]]
//! axis = 3
//! stage = "ZFM2020"
//! reverse = true
//! ```

use crate::axis::{Axis, AxisSettings, AXIS_COUNT};
use crate::stages::StageModel;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use mcm_core::limits::{
    DEFAULT_HOME_TIMEOUT, DEFAULT_MOVE_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_READ_TIMEOUT,
};
use mcm_core::McmError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Baud rate the MCM3000 ships with.
pub const DEFAULT_BAUD_RATE: u32 = 460_800;

/// Environment variable prefix merged over file configuration.
pub const ENV_PREFIX: &str = "MCM3000_";

const MIN_BAUD_RATE: u32 = 300;
const MAX_BAUD_RATE: u32 = 921_600;

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong field types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Config validation failed:\n{0}")]
    ValidationError(String),
}

impl From<ConfigError> for McmError {
    fn from(err: ConfigError) -> Self {
        McmError::Configuration(err.to_string())
    }
}

/// One connected stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Axis number (1-3)
    pub axis: u8,
    /// Stage model on this axis
    pub stage: StageModel,
    /// Invert travel direction
    #[serde(default)]
    pub reverse: bool,
    /// Override the catalogue encoder scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub um_per_count: Option<f64>,
    /// Override the lower travel limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_um: Option<f64>,
    /// Override the upper travel limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_um: Option<f64>,
    /// Override the settle tolerance (counts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_counts: Option<u32>,
}

impl AxisConfig {
    /// Axis with catalogue settings.
    pub fn new(axis: u8, stage: StageModel) -> Self {
        Self {
            axis,
            stage,
            reverse: false,
            um_per_count: None,
            min_um: None,
            max_um: None,
            tolerance_counts: None,
        }
    }

    /// Set the reverse flag.
    #[must_use]
    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Resolved settings, catalogue values with overrides applied.
    #[must_use]
    pub fn settings(&self) -> AxisSettings {
        let mut settings = AxisSettings::for_stage(self.stage).reversed(self.reverse);
        if let Some(f) = self.um_per_count {
            settings.um_per_count = f;
        }
        if let Some(min) = self.min_um {
            settings.min_um = min;
        }
        if let Some(max) = self.max_um {
            settings.max_um = max;
        }
        if let Some(tol) = self.tolerance_counts {
            settings.tolerance_counts = tol;
        }
        settings
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_move_timeout() -> Duration {
    DEFAULT_MOVE_TIMEOUT
}

fn default_home_timeout() -> Duration {
    DEFAULT_HOME_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_true() -> bool {
    true
}

/// Connection and axis configuration for one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mcm3000Config {
    /// Serial port path, or `"auto"` to detect the controller over USB
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Bound on each reply
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Bound on waiting for a move to reach its target
    #[serde(default = "default_move_timeout", with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Bound on homing
    #[serde(default = "default_home_timeout", with = "humantime_serde")]
    pub home_timeout: Duration,
    /// Encoder poll period while waiting for motion
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// `move_to` waits for the move to finish
    #[serde(default = "default_true")]
    pub wait_for_moves: bool,
    /// Connected stages
    #[serde(default)]
    pub axes: Vec<AxisConfig>,
}

impl Mcm3000Config {
    /// Defaults for `port` with no axes configured.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_READ_TIMEOUT,
            move_timeout: DEFAULT_MOVE_TIMEOUT,
            home_timeout: DEFAULT_HOME_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_for_moves: true,
            axes: Vec::new(),
        }
    }

    /// Add an axis.
    #[must_use]
    pub fn with_axis(mut self, axis: AxisConfig) -> Self {
        self.axes.push(axis);
        self
    }

    /// Set the per-reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the move completion timeout.
    #[must_use]
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// Load from a TOML file, with environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        debug!("Loading MCM3000 config from: {}", path.display());

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        info!(
            port = %config.port,
            axes = config.axes.len(),
            "Loaded MCM3000 config"
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(toml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Toml::string(toml_content))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Convert and validate an already-parsed TOML value.
    pub fn from_value(value: toml::Value) -> Result<Self, ConfigError> {
        let config: Self = value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Cross-field validation.
    ///
    /// Collects every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.port.trim().is_empty() {
            errors.push("port must not be empty".to_string());
        }
        if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&self.baud_rate) {
            errors.push(format!(
                "baud_rate {} outside {}..={}",
                self.baud_rate, MIN_BAUD_RATE, MAX_BAUD_RATE
            ));
        }
        for (name, value) in [
            ("timeout", self.timeout),
            ("move_timeout", self.move_timeout),
            ("home_timeout", self.home_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                errors.push(format!("{} must be greater than zero", name));
            }
        }

        if self.axes.is_empty() {
            errors.push("at least one axis must be configured".to_string());
        }

        let mut seen = [false; AXIS_COUNT as usize];
        for axis in &self.axes {
            match Axis::new(axis.axis) {
                Ok(a) => {
                    let slot = &mut seen[usize::from(a.channel())];
                    if *slot {
                        errors.push(format!("axis {} configured more than once", axis.axis));
                    }
                    *slot = true;
                }
                Err(_) => {
                    errors.push(format!("axis {} outside 1..={}", axis.axis, AXIS_COUNT));
                }
            }

            let s = axis.settings();
            if !(s.um_per_count.is_finite() && s.um_per_count > 0.0) {
                errors.push(format!(
                    "axis {}: um_per_count must be positive, got {}",
                    axis.axis, s.um_per_count
                ));
            }
            if !(s.min_um.is_finite() && s.max_um.is_finite() && s.min_um < s.max_um) {
                errors.push(format!(
                    "axis {}: travel range [{}, {}] is empty",
                    axis.axis, s.min_um, s.max_um
                ));
            }
            if s.tolerance_counts < 1 {
                errors.push(format!("axis {}: tolerance_counts must be >= 1", axis.axis));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("\n")))
        }
    }

    /// Validated axis list with resolved settings, ordered by axis number.
    pub fn axis_settings(&self) -> Result<Vec<(Axis, AxisSettings)>, ConfigError> {
        self.validate()?;
        let mut axes = Vec::with_capacity(self.axes.len());
        for cfg in &self.axes {
            let axis =
                Axis::new(cfg.axis).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            axes.push((axis, cfg.settings()));
        }
        axes.sort_by_key(|(axis, _)| *axis);
        Ok(axes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        port = "/dev/ttyUSB0"
        timeout = "250ms"

        [[axes]]
        axis = 1
        stage = "ZFM2020"

        [[axes]]
        axis = 3
        stage = "MMP-2XY"
        reverse = true
        max_um = 1000.0
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let cfg = Mcm3000Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        assert_eq!(cfg.baud_rate, 460_800);
        assert_eq!(cfg.timeout, Duration::from_millis(250));
        assert_eq!(cfg.move_timeout, Duration::from_secs(5));
        assert!(cfg.wait_for_moves);
        assert_eq!(cfg.axes.len(), 2);

        let settings = cfg.axes[1].settings();
        assert!(settings.reverse);
        assert_eq!(settings.um_per_count, 0.5);
        assert_eq!(settings.min_um, -25_400.0);
        assert_eq!(settings.max_um, 1000.0);
        assert_eq!(settings.tolerance_counts, 1);
    }

    #[test]
    fn test_from_value() {
        let table: toml::Table =
            toml::from_str("port = \"COM3\"\n[[axes]]\naxis = 2\nstage = \"PLS-X\"\n").unwrap();
        let value = toml::Value::Table(table);
        let cfg = Mcm3000Config::from_value(value).unwrap();
        assert_eq!(cfg.axes[0].stage, StageModel::PlsX);
    }

    #[test]
    fn test_validation_collects_errors() {
        let cfg = Mcm3000Config {
            baud_rate: 10,
            timeout: Duration::ZERO,
            ..Mcm3000Config::new("/dev/ttyUSB0")
        }
        .with_axis(AxisConfig::new(4, StageModel::Zfm2020))
        .with_axis(AxisConfig {
            min_um: Some(5.0),
            max_um: Some(5.0),
            tolerance_counts: Some(0),
            ..AxisConfig::new(1, StageModel::Zfm2020)
        })
        .with_axis(AxisConfig::new(1, StageModel::Zfm2030));

        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("baud_rate 10"));
        assert!(msg.contains("timeout must be greater than zero"));
        assert!(msg.contains("axis 4 outside"));
        assert!(msg.contains("axis 1 configured more than once"));
        assert!(msg.contains("travel range"));
        assert!(msg.contains("tolerance_counts"));
    }

    #[test]
    fn test_no_axes_rejected() {
        let err = Mcm3000Config::from_toml_str("port = \"auto\"").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = Mcm3000Config::from_toml_str("port = [\"a\", \"b\"]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));

        let err = Mcm3000Config::from_toml_str(
            "port = \"auto\"\n[[axes]]\naxis = 1\nstage = \"NOPE\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_axis_settings_sorted() {
        let cfg = Mcm3000Config::new("auto")
            .with_axis(AxisConfig::new(3, StageModel::Zfm2020))
            .with_axis(AxisConfig::new(1, StageModel::Zfm2020));
        let axes: Vec<u8> = cfg
            .axis_settings()
            .unwrap()
            .iter()
            .map(|(a, _)| a.number())
            .collect();
        assert_eq!(axes, vec![1, 3]);
    }

    #[test]
    fn test_toml_round_trip_keeps_durations_readable() {
        let cfg = Mcm3000Config::from_toml_str(SAMPLE).unwrap();
        let text = cfg.to_toml_string().unwrap();
        assert!(text.contains("timeout = \"250ms\""));
        assert!(text.contains("[[axes]]"));
        assert_eq!(Mcm3000Config::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_config_error_maps_to_mcm_error() {
        let err: McmError = ConfigError::NotFound("x.toml".into()).into();
        assert_eq!(err.kind(), mcm_core::ErrorKind::Configuration);
    }
}
