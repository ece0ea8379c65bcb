use super::*;

#[cfg(feature = "serial")]
pub mod serial;

use once_cell::sync::Lazy;
use regex::Regex;
use std::{borrow::Cow, fmt, time::Duration};

/// Literal that every identification response carries.
pub const IDENTIFY_MARKER: &str = "AquaChck";

pub const LINE_TERMINATOR: &str = "\r\n";

/// Timeout for reading a single response line
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a single response line, terminator included
pub const MAX_LINE_LEN: usize = 256;

pub const MODEL_LEN: usize = 6;
pub const VERSION_LEN: usize = 3;

const DELAY_DIGITS: usize = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Nothing but line terminators (or nothing at all) was received
    NoResponse,
    MissingMarker,
    InvalidTiming,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DecodeError::*;
        match self {
            NoResponse => write!(f, "No response"),
            MissingMarker => write!(f, "Missing {} marker", IDENTIFY_MARKER),
            InvalidTiming => write!(f, "Invalid measurement timing"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Bus address of a probe, a single decimal digit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Address(u8);

impl Address {
    pub const fn max_value() -> u8 {
        9
    }

    pub fn new(address: u8) -> Option<Self> {
        if address <= Self::max_value() {
            Some(Self(address))
        } else {
            None
        }
    }

    pub const fn to_u8(self) -> u8 {
        self.0
    }
}

/// Error for bus addresses beyond a single digit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InvalidAddress(pub u8);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid bus address {} (expected 0-{})",
            self.0,
            Address::max_value()
        )
    }
}

impl std::error::Error for InvalidAddress {}

impl TryFrom<u8> for Address {
    type Error = InvalidAddress;

    fn try_from(from: u8) -> Result<Self, Self::Error> {
        Self::new(from).ok_or(InvalidAddress(from))
    }
}

impl From<Address> for u8 {
    fn from(from: Address) -> Self {
        from.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two measurements every probe offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measurement {
    Moisture,
    Temperature,
}

impl Measurement {
    pub const fn index(self) -> u8 {
        match self {
            Measurement::Moisture => 0,
            Measurement::Temperature => 1,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Moisture => write!(f, "moisture"),
            Measurement::Temperature => write!(f, "temperature"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Identify,
    StartMeasurement(Measurement),
    SendData(u8),
}

/// Build the complete command frame `<address><verb><args>!\r\n`.
pub fn encode_command(address: Address, command: Command) -> String {
    match command {
        Command::Identify => format!("{}I!{}", address, LINE_TERMINATOR),
        Command::StartMeasurement(measurement) => {
            format!("{}M{}!{}", address, measurement.index(), LINE_TERMINATOR)
        }
        Command::SendData(index) => format!("{}D{}!{}", address, index, LINE_TERMINATOR),
    }
}

/// Decode a received line and strip all trailing whitespace, including
/// the CR-LF terminator.
pub fn trim_line(bytes: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(line) => Cow::Borrowed(line.trim_end()),
        Cow::Owned(line) => Cow::Owned(line.trim_end().to_owned()),
    }
}

fn split_at_char(input: &str, count: usize) -> (&str, &str) {
    let mid = input
        .char_indices()
        .nth(count)
        .map(|(idx, _)| idx)
        .unwrap_or_else(|| input.len());
    input.split_at(mid)
}

/// Parse the answer to the identify command.
///
/// Only the marker is mandatory, fields that are cut short are taken
/// as far as they go.
pub fn decode_identification(line: &str) -> DecodeResult<Identification> {
    if line.is_empty() {
        return Err(DecodeError::NoResponse);
    }
    let (_, model_info) = line
        .split_once(IDENTIFY_MARKER)
        .ok_or(DecodeError::MissingMarker)?;
    let (model, rest) = split_at_char(model_info, MODEL_LEN);
    let (firmware_version, serial_number) = split_at_char(rest, VERSION_LEN);
    Ok(Identification {
        model: model.to_owned(),
        serial_number: serial_number.to_owned(),
        firmware_version: firmware_version.to_owned(),
    })
}

/// Answer to a start measurement command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurementTiming {
    /// Time until the values are ready to be fetched
    pub delay: Duration,
    pub sensor_count: u8,
}

impl MeasurementTiming {
    /// The probe will send an attention response when ready.
    pub fn expects_attention(&self) -> bool {
        self.delay > Duration::ZERO
    }
}

pub fn decode_measurement_timing(line: &str) -> DecodeResult<MeasurementTiming> {
    if line.is_empty() {
        return Err(DecodeError::NoResponse);
    }
    if line.len() <= DELAY_DIGITS {
        return Err(DecodeError::InvalidTiming);
    }
    let delay = line
        .get(..DELAY_DIGITS)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u64>().ok())
        .ok_or(DecodeError::InvalidTiming)?;
    let sensor_count = line
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .ok_or(DecodeError::InvalidTiming)?;
    Ok(MeasurementTiming {
        delay: Duration::from_secs(delay),
        sensor_count: sensor_count as u8,
    })
}

static VALUE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-][0-9]+\.[0-9]+").expect("valid value pattern"));

/// Outcome of validating one value field of a data response.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueClass {
    Accepted(SensorValue),
    Invalid(String),
    OutOfRange(SensorValue),
}

pub fn classify_value(field: &str) -> ValueClass {
    match field.parse::<f64>() {
        Ok(val) => {
            let val = SensorValue::new(val);
            if val.is_valid() {
                ValueClass::Accepted(val)
            } else {
                ValueClass::OutOfRange(val)
            }
        }
        Err(_) => ValueClass::Invalid(field.to_owned()),
    }
}

/// Extract and classify all sign-delimited value fields that are packed
/// back-to-back into a data response.
pub fn decode_values(line: &str) -> impl Iterator<Item = ValueClass> + '_ {
    VALUE_PATTERN
        .find_iter(line)
        .map(|field| classify_value(field.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(line: &str) -> Vec<f64> {
        decode_values(line)
            .filter_map(|class| match class {
                ValueClass::Accepted(val) => Some(val.to_f64()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn encode_commands() {
        let addr = Address::new(0).unwrap();
        assert_eq!("0I!\r\n", encode_command(addr, Command::Identify));
        assert_eq!(
            "0M0!\r\n",
            encode_command(addr, Command::StartMeasurement(Measurement::Moisture))
        );
        assert_eq!(
            "0M1!\r\n",
            encode_command(addr, Command::StartMeasurement(Measurement::Temperature))
        );
        let addr = Address::new(7).unwrap();
        assert_eq!("7D3!\r\n", encode_command(addr, Command::SendData(3)));
    }

    #[test]
    fn address_range() {
        assert!(Address::new(0).is_some());
        assert!(Address::new(9).is_some());
        assert!(Address::new(10).is_none());
    }

    #[test]
    fn trim_received_lines() {
        assert_eq!("0036", trim_line(b"0036\r\n"));
        assert_eq!("", trim_line(b"\r\n"));
        assert_eq!("", trim_line(b""));
    }

    #[test]
    fn decode_identify_response() {
        let id = decode_identification("013AquaChckACHSDI043S012345").unwrap();
        assert_eq!("ACHSDI", id.model);
        assert_eq!("043", id.firmware_version);
        assert_eq!("S012345", id.serial_number);
        // Truncated
        let id = decode_identification("013AquaChckACH").unwrap();
        assert_eq!("ACH", id.model);
        assert!(id.firmware_version.is_empty());
        assert!(id.serial_number.is_empty());
    }

    #[test]
    fn decode_identify_errors() {
        assert_eq!(Err(DecodeError::NoResponse), decode_identification(""));
        assert_eq!(
            Err(DecodeError::MissingMarker),
            decode_identification("013AquaCheckACHSDI043S012345")
        );
    }

    #[test]
    fn decode_timing() {
        assert_eq!(
            MeasurementTiming {
                delay: Duration::from_secs(3),
                sensor_count: 6,
            },
            decode_measurement_timing("0036").unwrap()
        );
        let timing = decode_measurement_timing("0004").unwrap();
        assert!(!timing.expects_attention());
        assert_eq!(4, timing.sensor_count);
        assert_eq!(
            Duration::from_secs(120),
            decode_measurement_timing("12009").unwrap().delay
        );
        // Invalid
        assert_eq!(Err(DecodeError::NoResponse), decode_measurement_timing(""));
        assert_eq!(Err(DecodeError::InvalidTiming), decode_measurement_timing("003"));
        assert_eq!(Err(DecodeError::InvalidTiming), decode_measurement_timing("0x36"));
        assert_eq!(Err(DecodeError::InvalidTiming), decode_measurement_timing("003x"));
    }

    #[test]
    fn decode_packed_values() {
        assert_eq!(vec![112.12345, -4.689], accepted("+112.12345-4.689"));
        assert_eq!(
            vec![32.0, 44.0, 99.0, 100.2],
            accepted("+32.0000+44.000+99.00+100.2")
        );
        assert_eq!(vec![4.567], accepted("+4.567,"));
    }

    #[test]
    fn only_well_formed_fields_are_counted() {
        assert_eq!(0, decode_values("").count());
        assert_eq!(0, decode_values("0").count());
        assert_eq!(0, decode_values("+12-3+.5+7.").count());
        assert_eq!(2, decode_values("12.5+1.5 -2.0").count());
    }

    #[test]
    fn classify_range() {
        assert_eq!(
            ValueClass::OutOfRange(SensorValue::new(-5.0)),
            classify_value("-5.0")
        );
        assert_eq!(
            ValueClass::OutOfRange(SensorValue::new(120.0)),
            classify_value("+120.0")
        );
        assert_eq!(
            ValueClass::Accepted(SensorValue::new(-4.999)),
            classify_value("-4.999")
        );
        assert_eq!(
            ValueClass::Accepted(SensorValue::new(119.999)),
            classify_value("+119.999")
        );
        assert_eq!(ValueClass::Invalid("+x".into()), classify_value("+x"));
    }
}
