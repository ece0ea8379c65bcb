//! One complete exchange with a single probe per poll cycle.

use crate::{
    core::{sdi12::*, Identification, ProbeHealth},
    sdi12::ProbeConnection,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, io, time::Duration};

/// The values read from one probe during one poll cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    #[serde(rename = "name")]
    pub probe_name: String,
    pub moisture_values: Vec<f64>,
    pub temperature_values: Vec<f64>,
    #[serde(skip)]
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        probe_name: impl Into<String>,
        moisture_values: Vec<f64>,
        temperature_values: Vec<f64>,
    ) -> Self {
        Self {
            probe_name: probe_name.into(),
            moisture_values,
            temperature_values,
            captured_at: Utc::now(),
        }
    }
}

/// Why a session did not produce a reading.
#[derive(Debug)]
pub enum ProbeError {
    /// The port could not be opened or failed during the exchange
    Interface(io::Error),
    /// No answer at all to the identify command
    Silent,
    /// The identify answer was malformed
    Identification(DecodeError),
    /// Values were malformed, out of range or incomplete
    InvalidData,
}

impl ProbeError {
    pub fn health(&self) -> ProbeHealth {
        use ProbeError::*;
        match self {
            Interface(_) | Silent => ProbeHealth::InterfaceError,
            Identification(_) | InvalidData => ProbeHealth::ProtocolError,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProbeError::*;
        match self {
            Interface(err) => write!(f, "Interface failure: {}", err),
            Silent => write!(f, "No response from probe"),
            Identification(err) => write!(f, "Invalid identification: {}", err),
            InvalidData => write!(f, "Failed to read all sensors"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Interface(err) => Some(err),
            ProbeError::Identification(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(from: io::Error) -> Self {
        ProbeError::Interface(from)
    }
}

/// Steps of a session, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Idle,
    Identifying,
    Measuring(Measurement),
    AwaitingAttention,
    Collecting(Measurement),
    Done,
}

/// Values of a single measurement, and whether any of them was rejected.
#[derive(Clone, Debug, Default, PartialEq)]
struct Collected {
    values: Vec<f64>,
    errored: bool,
}

impl Collected {
    fn failed() -> Self {
        Self {
            values: Vec::new(),
            errored: true,
        }
    }
}

/// Drives the protocol over an open connection.
///
/// Validation errors of the moisture measurement do not prevent the
/// temperature measurement, but either of them fails the session with
/// [`ProbeError::InvalidData`]. Interface failures abort immediately.
pub struct ProbeSession<'a> {
    name: &'a str,
    address: Address,
    connection: &'a mut ProbeConnection,
    read_timeout: Duration,
    step: Step,
}

impl<'a> ProbeSession<'a> {
    pub fn new(name: &'a str, address: Address, connection: &'a mut ProbeConnection) -> Self {
        Self {
            name,
            address,
            connection,
            read_timeout: READ_TIMEOUT,
            step: Step::Idle,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn run(&mut self) -> Result<Reading, ProbeError> {
        if self.connection.identification().is_none() {
            let identification = self.identify()?;
            log::debug!(
                "[{}] {} on {}",
                self.name,
                identification,
                self.connection.port()
            );
            self.connection.set_identification(identification);
        }
        let moisture = self.measure(Measurement::Moisture)?;
        let temperature = self.measure(Measurement::Temperature)?;
        self.enter(Step::Done);
        if moisture.errored || temperature.errored {
            return Err(ProbeError::InvalidData);
        }
        Ok(Reading::new(self.name, moisture.values, temperature.values))
    }

    fn enter(&mut self, step: Step) {
        log::trace!("[{}] {:?} -> {:?}", self.name, self.step, step);
        self.step = step;
    }

    fn send(&mut self, command: Command) -> io::Result<()> {
        let frame = encode_command(self.address, command);
        self.connection.transport().write_line(frame.as_bytes())
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        let timeout = self.read_timeout;
        self.connection.transport().read_line(timeout)
    }

    fn command(&mut self, command: Command) -> io::Result<String> {
        self.send(command)?;
        let line = self.receive()?;
        Ok(trim_line(&line).into_owned())
    }

    fn identify(&mut self) -> Result<Identification, ProbeError> {
        self.enter(Step::Identifying);
        let response = self.command(Command::Identify)?;
        decode_identification(&response).map_err(|err| match err {
            DecodeError::NoResponse => {
                log::error!("[{}] No response from probe", self.name);
                ProbeError::Silent
            }
            err => {
                log::error!("[{}] Invalid response: \"{}\"", self.name, response);
                ProbeError::Identification(err)
            }
        })
    }

    fn measure(&mut self, measurement: Measurement) -> Result<Collected, ProbeError> {
        self.enter(Step::Measuring(measurement));
        let response = self.command(Command::StartMeasurement(measurement))?;
        let timing = match decode_measurement_timing(&response) {
            Ok(timing) => timing,
            Err(err) => {
                log::error!(
                    "[{}] Failed to start {} measurement: {} (\"{}\")",
                    self.name,
                    measurement,
                    err,
                    response
                );
                return Ok(Collected::failed());
            }
        };
        if timing.expects_attention() {
            log::debug!(
                "[{}] {} {} sensors will be ready in {} seconds...",
                self.name,
                timing.sensor_count,
                measurement,
                timing.delay.as_secs()
            );
            if !self.await_attention(timing.delay)? {
                log::warn!("[{}] No \"attention response\", continuing...", self.name);
            }
        }
        self.collect(measurement, timing.sensor_count)
            .map_err(Into::into)
    }

    /// Wait until the probe signals that its values are ready, or the
    /// announced delay has passed.
    fn await_attention(&mut self, delay: Duration) -> io::Result<bool> {
        self.enter(Step::AwaitingAttention);
        let mut waited = Duration::ZERO;
        while waited < delay {
            if !self.receive()?.is_empty() {
                return Ok(true);
            }
            waited += self.read_timeout.max(Duration::from_millis(1));
        }
        Ok(false)
    }

    fn collect(&mut self, measurement: Measurement, sensor_count: u8) -> io::Result<Collected> {
        self.enter(Step::Collecting(measurement));
        let mut collected = Collected::default();
        for index in 0..sensor_count {
            let response = self.command(Command::SendData(index))?;
            if response.is_empty() {
                break;
            }
            for class in decode_values(&response) {
                match class {
                    ValueClass::Accepted(val) => collected.values.push(val.to_f64()),
                    ValueClass::Invalid(field) => {
                        log::error!(
                            "[{}] Invalid {} value \"{}\"",
                            self.name,
                            measurement,
                            field
                        );
                        collected.errored = true;
                    }
                    ValueClass::OutOfRange(val) => {
                        log::error!(
                            "[{}] Out of range {} value \"{}\"",
                            self.name,
                            measurement,
                            val.to_f64()
                        );
                        collected.errored = true;
                    }
                }
            }
        }
        if collected.values.len() != usize::from(sensor_count) && !collected.errored {
            log::error!(
                "[{}] Failed to read all {} sensors ({} of {})",
                self.name,
                measurement,
                collected.values.len(),
                sensor_count
            );
            collected.errored = true;
        }
        Ok(collected)
    }
}
