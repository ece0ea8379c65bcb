#[cfg(feature = "serial")]
pub mod serial;

use crate::core::Identification;

use std::{io::Result, time::Duration};

/// Line oriented, synchronous access to the bus of a single probe.
pub trait Transport: Send {
    /// Send a complete command frame, including its terminator.
    fn write_line(&mut self, line: &[u8]) -> Result<()>;

    /// Receive bytes up to and including the next CR-LF.
    ///
    /// The timeout bounds the whole call. Returns whatever has been
    /// received so far if it expires first, i.e. an empty line if the
    /// probe stayed silent.
    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Discard stale input, e.g. a late answer from a previous exchange.
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transports by port identifier.
pub trait Connector: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>>;
}

/// An open connection to a probe, owned by at most one session at a time.
pub struct ProbeConnection {
    port: String,
    transport: Box<dyn Transport>,
    identification: Option<Identification>,
}

impl ProbeConnection {
    pub fn open(connector: &dyn Connector, port: &str) -> Result<Self> {
        let mut transport = connector.open(port)?;
        transport.clear_input()?;
        Ok(Self {
            port: port.to_owned(),
            transport,
            identification: None,
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Identity of the probe, once it has been read on this connection.
    pub fn identification(&self) -> Option<&Identification> {
        self.identification.as_ref()
    }

    pub(crate) fn set_identification(&mut self, identification: Identification) {
        self.identification = Some(identification);
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn close(self) {
        log::debug!("Closing port {}", self.port);
    }
}

impl std::fmt::Debug for ProbeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConnection")
            .field("port", &self.port)
            .field("identification", &self.identification)
            .finish()
    }
}
