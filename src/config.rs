//! Runtime configuration, stored as a RON file.
//!
//! Every field has a default, so a file only needs to mention what it
//! changes:
//!
//! ```ron
//! (
//!     sensor: (port: "/dev/ttyUSB0"),
//!     audio: (tracks: ["/srv/music/lobby.mp3"]),
//!     relay: (device: Some("/dev/hidraw0")),
//! )
//! ```

use crate::actuator::{AudioConfig, RelayConfig};
use crate::command::{CommandOptions, SensorParameters};
use crate::controller::ControlConfig;
use crate::presence::FusionConfig;
use crate::sensor_reader::ReaderOptions;
use crate::telemetry::GateResolution;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt::Display, fs, io, path::Path, time::Duration};

/// Failure to load or store a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    IOError(io::Error),
    /// The file is not valid RON for [`CrescendoConfig`].
    RonSpannedError(ron::de::SpannedError),
    /// The configuration could not be serialized.
    RonError(ron::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IOError(e) => write!(f, "config io error: {}", e),
            ConfigError::RonSpannedError(e) => write!(f, "invalid config: {}", e),
            ConfigError::RonError(e) => write!(f, "config serialization failed: {}", e),
        }
    }
}

impl Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl From<ron::Error> for ConfigError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

/// How to reach and set up the sensor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial device the sensor is wired to.
    pub port: String,
    /// UART speed.
    pub baud_rate: u32,
    /// Upper bound on a single blocking read.
    pub read_timeout_ms: u64,
    /// How long to wait for a command acknowledgement.
    pub ack_timeout_ms: u64,
    /// How long the sensor needs after a restart.
    pub restart_settle_ms: u64,
    /// Whether `run` pushes `parameters` to the sensor before starting.
    pub configure_on_start: bool,
    /// The gate width the sensor is set up for.
    pub gate_resolution: GateResolution,
    /// Detection parameters to apply.
    pub parameters: SensorParameters,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".into(),
            baud_rate: 256_000,
            read_timeout_ms: 100,
            ack_timeout_ms: 1000,
            restart_settle_ms: 2000,
            configure_on_start: true,
            gate_resolution: GateResolution::default(),
            parameters: SensorParameters::default(),
        }
    }
}

impl SensorConfig {
    /// Bound on a single blocking read.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Options for a [`crate::command::CommandEngine`].
    pub fn command_options(&self) -> CommandOptions {
        CommandOptions {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            restart_settle: Duration::from_millis(self.restart_settle_ms),
        }
    }

    /// Options for a [`crate::sensor_reader::SensorReader`].
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            poll_timeout: self.read_timeout(),
            resolution: self.gate_resolution,
        }
    }
}

/// Everything the `crescendo` binary can be told.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CrescendoConfig {
    /// The sensor link.
    pub sensor: SensorConfig,
    /// Presence fusion tuning.
    pub presence: FusionConfig,
    /// Control loop timing.
    pub control: ControlConfig,
    /// Music playback.
    pub audio: AudioConfig,
    /// Speaker power relay.
    pub relay: RelayConfig,
}

impl CrescendoConfig {
    /// Parses a configuration from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::de::from_str(text)?)
    }

    /// Reads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ron(&fs::read_to_string(path)?)
    }

    /// Renders the configuration as pretty RON.
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Writes the configuration to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = CrescendoConfig::from_ron("()").unwrap();
        assert_eq!(config, CrescendoConfig::default());
        assert_eq!(config.sensor.port, "/dev/ttyAMA0");
        assert_eq!(config.sensor.baud_rate, 256_000);
        assert_eq!(config.control.relay_off_delay_s, 900.0);
        assert_eq!(config.presence.min_detections, 3);
    }

    #[test]
    fn partial_file_overrides_only_what_it_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"(
                sensor: (port: "/dev/ttyUSB0", gate_resolution: Fine),
                control: (relay_off_delay_s: 60.0),
                relay: (device: Some("/dev/hidraw3")),
            )"#
        )
        .unwrap();

        let config = CrescendoConfig::load(file.path()).unwrap();
        assert_eq!(config.sensor.port, "/dev/ttyUSB0");
        assert_eq!(config.sensor.gate_resolution, GateResolution::Fine);
        assert_eq!(config.sensor.ack_timeout_ms, 1000);
        assert_eq!(config.control.relay_off_delay(), Duration::from_secs(60));
        assert_eq!(config.control.check_interval_s, 1.0);
        assert_eq!(config.relay.device.as_deref(), Some(Path::new("/dev/hidraw3")));
        assert_eq!(config.relay.channel, 1);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crescendo.ron");
        let mut config = CrescendoConfig::default();
        config.audio.tracks = vec!["a.mp3".into(), "b.mp3".into()];
        config.sensor.parameters.no_one_duration_s = 30;

        config.save(&path).unwrap();
        assert_eq!(CrescendoConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn garbage_is_a_ron_error() {
        assert!(matches!(
            CrescendoConfig::from_ron("(sensor: 12"),
            Err(ConfigError::RonSpannedError(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CrescendoConfig::load(dir.path().join("nope.ron")),
            Err(ConfigError::IOError(_))
        ));
    }
}
