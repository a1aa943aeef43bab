//! Session and run configuration.
//!
//! A run file mirrors the parameter block an operator edits before a
//! measurement: which port, which current range, which technique and its
//! parameters. JSON and TOML are both accepted.
//!
//! ```toml
//! current_range = 200
//!
//! [session]
//! port = "/dev/ttyACM0"
//!
//! [measurement]
//! kind = "cyclic"
//! start_potential_mv = -500
//! end_potential_mv = 500
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::{CyclicVoltammetry, Measurement};
use crate::errors::{DriverError, Result};
use crate::receiver::StreamPolicy;
use crate::transport::DEFAULT_TIMEOUT;

/// Default current range in µA.
pub const DEFAULT_CURRENT_RANGE: u32 = 200;

/// How to reach the device and how to treat corrupt frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port path (e.g. `/dev/ttyACM0`, `COM14`).
    pub port: String,
    /// Deadline for a single line read.
    pub read_timeout_ms: u64,
    pub stream_policy: StreamPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            read_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            stream_policy: StreamPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(DriverError::Config("serial port must be set".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(DriverError::Config("read timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// One complete measurement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub session: SessionConfig,
    /// Current range in µA.
    #[serde(default = "default_current_range")]
    pub current_range: u32,
    #[serde(default = "default_measurement")]
    pub measurement: Measurement,
}

fn default_current_range() -> u32 {
    DEFAULT_CURRENT_RANGE
}

fn default_measurement() -> Measurement {
    Measurement::Cyclic(CyclicVoltammetry::default())
}

impl RunConfig {
    /// Load a run from a `.json` or `.toml` file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("failed to read {}: {e}", path.display())))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)?,
            Some("toml") => Self::from_toml(&content)?,
            _ => {
                return Err(DriverError::Config(
                    "config file must be .json or .toml".into(),
                ))
            }
        };

        config.session.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| DriverError::Config(format!("invalid JSON config: {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DriverError::Config(format!("invalid TOML config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Opcode, SquareWaveVoltammetry};

    #[test]
    fn toml_run_with_partial_parameters() {
        let config = RunConfig::from_toml(
            r#"
            current_range = 100

            [session]
            port = "/dev/ttyACM0"
            stream_policy = "skip_corrupt"

            [measurement]
            kind = "square_wave"
            pulse_frequency_hz = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.current_range, 100);
        assert_eq!(config.session.port, "/dev/ttyACM0");
        assert_eq!(config.session.stream_policy, StreamPolicy::SkipCorrupt);
        assert_eq!(config.session.read_timeout_ms, DEFAULT_TIMEOUT.as_millis() as u64);
        assert_eq!(config.measurement.opcode(), Opcode::Swv);
        assert_eq!(
            config.measurement,
            Measurement::SquareWave(SquareWaveVoltammetry {
                pulse_frequency_hz: 25.0,
                ..SquareWaveVoltammetry::default()
            })
        );
    }

    #[test]
    fn json_defaults_to_cyclic() {
        let config = RunConfig::from_json(r#"{ "session": { "port": "COM14" } }"#).unwrap();
        assert_eq!(config.current_range, DEFAULT_CURRENT_RANGE);
        assert_eq!(config.session.stream_policy, StreamPolicy::FailFast);
        assert_eq!(config.measurement.payload(), "CVW,1000,-500,500,200,5,2");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = RunConfig::from_json(r#"{ "measurement": { "kind": "linear" } }"#).unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn validation() {
        assert!(SessionConfig::default().validate().is_err());
        assert!(SessionConfig::new("/dev/ttyUSB0").validate().is_ok());
        let config = SessionConfig {
            read_timeout_ms: 0,
            ..SessionConfig::new("/dev/ttyUSB0")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_checks_extension_and_port() {
        let dir = std::env::temp_dir();

        let path = dir.join(format!("openafe-run-{}.yaml", std::process::id()));
        std::fs::write(&path, "current_range: 1").unwrap();
        assert!(matches!(
            RunConfig::load_from_file(&path),
            Err(DriverError::Config(_))
        ));
        std::fs::remove_file(&path).unwrap();

        let path = dir.join(format!("openafe-run-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "current_range": 50 }"#).unwrap();
        // no port configured
        assert!(RunConfig::load_from_file(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
