/// Wire protocol of the AquaCheck probes
pub mod sdi12;

use std::fmt;

/// A single measured value as reported by one sensor of a probe.
///
/// Both moisture (volumetric water content in percent) and temperature
/// (degree Celsius) sensors share the same admissible range.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct SensorValue(f64);

impl SensorValue {
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    pub const fn to_f64(self) -> f64 {
        self.0
    }

    /// Exclusive lower bound
    pub const fn min_value() -> f64 {
        -5.0
    }

    /// Exclusive upper bound
    pub const fn max_value() -> f64 {
        120.0
    }

    pub fn is_valid(self) -> bool {
        self.0 > Self::min_value() && self.0 < Self::max_value()
    }
}

impl From<f64> for SensorValue {
    fn from(from: f64) -> Self {
        SensorValue(from)
    }
}

impl From<SensorValue> for f64 {
    fn from(from: SensorValue) -> Self {
        from.0
    }
}

/// Health of a single probe as tracked across poll cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ProbeHealth {
    /// The last cycle produced a complete reading.
    Ready,
    /// The probe answered, but with malformed, out-of-range or incomplete data.
    #[serde(rename = "Protocol Error")]
    ProtocolError,
    /// The port could not be opened or the probe stayed silent.
    #[serde(rename = "Interface Error")]
    InterfaceError,
}

impl Default for ProbeHealth {
    /// Probes are considered unopened until they answer.
    fn default() -> Self {
        ProbeHealth::InterfaceError
    }
}

impl fmt::Display for ProbeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProbeHealth::*;
        match self {
            Ready => write!(f, "Ready"),
            ProtocolError => write!(f, "Protocol Error"),
            InterfaceError => write!(f, "Interface Error"),
        }
    }
}

/// Identity of a probe, as answered to the identify command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identification {
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AquaCheck {} S/N {} v.{}",
            self.model, self.serial_number, self.firmware_version
        )
    }
}
