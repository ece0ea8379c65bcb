use crate::sdi12::{Connector, Transport};

use std::{
    collections::{HashMap, VecDeque},
    io::{Error, ErrorKind, Result},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

/// Lines that have been written to a [`ScriptedTransport`].
#[derive(Clone, Debug, Default)]
pub struct Written(Arc<Mutex<Vec<String>>>);

impl Written {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// A transport that answers with a fixed script of lines, one per
/// `read_line()`, and stays silent once the script is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: VecDeque<Vec<u8>>,
    written: Written,
}

impl ScriptedTransport {
    pub fn new<I, L>(responses: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Vec<u8>>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            written: Default::default(),
        }
    }

    /// Append more responses, e.g. for a subsequent poll cycle.
    pub fn then<I, L>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Vec<u8>>,
    {
        self.responses.extend(responses.into_iter().map(Into::into));
        self
    }

    pub fn written(&self) -> Written {
        self.written.clone()
    }
}

impl Transport for ScriptedTransport {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.written
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(String::from_utf8_lossy(line).into_owned());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.responses.pop_front().unwrap_or_default())
    }
}

/// Hands out prepared transports by port identifier.
///
/// Opening a port without a prepared transport fails with `NotFound`,
/// like a missing device file would.
#[derive(Default)]
pub struct MockConnector {
    transports: Mutex<HashMap<String, VecDeque<Box<dyn Transport>>>>,
    opened: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&self, port: impl Into<String>, transport: impl Transport + 'static) {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(port.into())
            .or_default()
            .push_back(Box::new(transport));
    }

    /// All ports that have been opened successfully, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>> {
        let transport = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(port)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("No such device: {}", port)))?;
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(port.to_owned());
        Ok(transport)
    }
}
