use super::*;

use crate::core::sdi12::{serial::*, MAX_LINE_LEN, READ_TIMEOUT};

use serialport::{ClearBuffer, SerialPort};
use std::{
    io::{ErrorKind, Read, Write},
    time::Instant,
};

/// Opens probes attached to local serial devices.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open_path(port)?))
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open_path(path: &str) -> Result<Self> {
        log::info!("Opening serial port {}", path);
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .flow_control(FLOW_CONTROL)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self::new(port))
    }

    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.port.write_all(line)?;
        self.port.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while line.len() < MAX_LINE_LEN {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if line.ends_with(b"\r\n") {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::TimedOut => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if line.len() >= MAX_LINE_LEN {
            log::warn!("Response line exceeds {} bytes, truncating", MAX_LINE_LEN);
        }
        Ok(line)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use serialport::TTYPort;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
    };

    #[test]
    fn read_complete_line() {
        let (master, mut slave) = TTYPort::pair().unwrap();
        let mut transport = SerialTransport::new(Box::new(master));
        slave.write_all(b"0036\r\n").unwrap();
        let line = transport.read_line(Duration::from_secs(1)).unwrap();
        assert!(line.starts_with(b"0036"));
        assert!(line.ends_with(b"\r\n"));
    }

    #[test]
    fn timeout_bounds_the_whole_line() {
        let (master, mut slave) = TTYPort::pair().unwrap();
        let mut transport = SerialTransport::new(Box::new(master));
        let stop = Arc::new(AtomicBool::new(false));
        let chatter = thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                // Never terminated by CR-LF
                while !stop.load(Ordering::Relaxed) {
                    let _ = slave.write_all(b"x");
                    thread::sleep(Duration::from_millis(20));
                }
            }
        });

        let started = Instant::now();
        let line = transport.read_line(Duration::from_millis(300)).unwrap();
        let elapsed = started.elapsed();
        stop.store(true, Ordering::Relaxed);
        chatter.join().unwrap();

        assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);
        assert!(!line.is_empty());
        assert!(line.len() < MAX_LINE_LEN);
        assert!(line.iter().all(|b| *b == b'x'));
    }
}
