//! Probe configuration, loaded from a TOML file:
//!
//! ```toml
//! read_interval = 360
//!
//! [[probes]]
//! name = "Zone 1"
//! port = "/dev/ttyUSB0"
//! address = 0
//! ```

use crate::core::sdi12::Address;

use serde::Deserialize;
use std::{collections::HashSet, fmt, fs, io, path::Path, time::Duration};

pub const DEFAULT_READ_INTERVAL_SECS: u64 = 360;

/// A probe attached to a serial port.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProbeConfig {
    /// Unique key of the probe
    pub name: String,
    #[serde(rename = "port")]
    pub port_identifier: String,
    #[serde(default)]
    pub address: Address,
}

impl ProbeConfig {
    pub fn new(name: impl Into<String>, port_identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_identifier: port_identifier.into(),
            address: Address::default(),
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Seconds between two scheduled reads
    #[serde(default = "default_read_interval")]
    pub read_interval: u64,
    pub probes: Vec<ProbeConfig>,
}

fn default_read_interval() -> u64 {
    DEFAULT_READ_INTERVAL_SECS
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    NoProbes,
    DuplicateName(String),
    EmptyPort(String),
    ZeroReadInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigError::*;
        match self {
            Io(err) => write!(f, "Failed to read configuration: {}", err),
            Parse(err) => write!(f, "Invalid configuration: {}", err),
            NoProbes => write!(f, "No probes configured"),
            DuplicateName(name) => write!(f, "Probe \"{}\" is configured twice", name),
            EmptyPort(name) => write!(f, "Probe \"{}\" has no serial port", name),
            ZeroReadInterval => write!(f, "Read interval must not be zero"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(from: io::Error) -> Self {
        ConfigError::Io(from)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(from: toml::de::Error) -> Self {
        ConfigError::Parse(from)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probes.is_empty() {
            return Err(ConfigError::NoProbes);
        }
        if self.read_interval == 0 {
            return Err(ConfigError::ZeroReadInterval);
        }
        let mut names = HashSet::new();
        for probe in &self.probes {
            if !names.insert(probe.name.as_str()) {
                return Err(ConfigError::DuplicateName(probe.name.clone()));
            }
            if probe.port_identifier.trim().is_empty() {
                return Err(ConfigError::EmptyPort(probe.name.clone()));
            }
        }
        Ok(())
    }

    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.read_interval)
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let config: Config = r#"
            read_interval = 180

            [[probes]]
            name = "Test Zone 1"
            port = "/dev/ttyTZ1"

            [[probes]]
            name = "Test Zone 2"
            port = "/dev/ttyTZ2"
            address = 3
        "#
        .parse()
        .unwrap();
        assert_eq!(Duration::from_secs(180), config.read_interval());
        assert_eq!(
            vec![
                ProbeConfig::new("Test Zone 1", "/dev/ttyTZ1"),
                ProbeConfig::new("Test Zone 2", "/dev/ttyTZ2")
                    .with_address(Address::new(3).unwrap()),
            ],
            config.probes
        );
    }

    #[test]
    fn read_interval_defaults() {
        let config: Config = r#"
            [[probes]]
            name = "Zone"
            port = "/dev/ttyUSB0"
        "#
        .parse()
        .unwrap();
        assert_eq!(Duration::from_secs(360), config.read_interval());
        assert_eq!(0, config.probes[0].address.to_u8());
    }

    #[test]
    fn reject_invalid_configs() {
        assert!(matches!(
            "probes = []".parse::<Config>(),
            Err(ConfigError::NoProbes)
        ));
        assert!(matches!(
            r#"
            [[probes]]
            name = "Zone"
            port = "/dev/ttyUSB0"
            address = 10
            "#
            .parse::<Config>(),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            r#"
            [[probes]]
            name = "Zone"
            port = "/dev/ttyUSB0"
            [[probes]]
            name = "Zone"
            port = "/dev/ttyUSB1"
            "#
            .parse::<Config>(),
            Err(ConfigError::DuplicateName(name)) if name == "Zone"
        ));
        assert!(matches!(
            r#"
            read_interval = 0
            [[probes]]
            name = "Zone"
            port = "/dev/ttyUSB0"
            "#
            .parse::<Config>(),
            Err(ConfigError::ZeroReadInterval)
        ));
        assert!(matches!(
            r#"
            [[probes]]
            name = "Zone"
            port = " "
            "#
            .parse::<Config>(),
            Err(ConfigError::EmptyPort(_))
        ));
    }
}
