//! Fan-out of one session per probe and fan-in of their outcomes.

use crate::{
    config::ProbeConfig,
    core::{sdi12::READ_TIMEOUT, ProbeHealth},
    sdi12::{Connector, ProbeConnection},
    session::{ProbeError, ProbeSession, Reading},
};

use futures::future::join_all;
use std::{
    collections::BTreeMap,
    fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::task::spawn_blocking;

/// A probe whose health changed during a poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthChange {
    pub probe_name: String,
    pub previous: ProbeHealth,
    pub current: ProbeHealth,
}

/// The result of a completed poll cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollReport {
    /// Readings of all successful probes, in configured order
    pub readings: Vec<Reading>,
    pub changes: Vec<HealthChange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollError {
    /// Another poll cycle is still in progress
    Busy,
    /// The poll cycle was torn down with its runtime
    Aborted,
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Busy => write!(f, "Busy"),
            PollError::Aborted => write!(f, "Poll cycle aborted"),
        }
    }
}

impl std::error::Error for PollError {}

#[derive(Debug)]
struct ProbeSlot {
    config: ProbeConfig,
    health: ProbeHealth,
    connection: Option<ProbeConnection>,
}

type Outcome = (Option<ProbeConnection>, Result<Reading, ProbeError>);

/// Polls a fixed set of probes and tracks their health.
///
/// The health of every probe and its idle connection are only touched
/// between poll cycles. While a cycle runs, the connections are owned
/// by the sessions.
pub struct ProbePool {
    connector: Arc<dyn Connector>,
    slots: Arc<Mutex<Vec<ProbeSlot>>>,
    cycle: Arc<tokio::sync::Mutex<()>>,
    read_timeout: Duration,
}

impl ProbePool {
    pub fn new(
        probes: impl IntoIterator<Item = ProbeConfig>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let slots = probes
            .into_iter()
            .map(|config| ProbeSlot {
                config,
                health: ProbeHealth::default(),
                connection: None,
            })
            .collect();
        Self {
            connector,
            slots: Arc::new(Mutex::new(slots)),
            cycle: Arc::new(tokio::sync::Mutex::new(())),
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn probes(&self) -> Vec<ProbeConfig> {
        self.lock_slots()
            .iter()
            .map(|slot| slot.config.clone())
            .collect()
    }

    pub fn current_state(&self) -> BTreeMap<String, ProbeHealth> {
        self.lock_slots()
            .iter()
            .map(|slot| (slot.config.name.clone(), slot.health))
            .collect()
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<ProbeSlot>> {
        lock_slots(&self.slots)
    }

    /// Run a complete poll cycle over all configured probes.
    ///
    /// Probes in [`ProbeHealth::InterfaceError`] are (re)opened first, then
    /// all connected probes are read in parallel. Fails with
    /// [`PollError::Busy`] without touching any state if a cycle is
    /// already in progress.
    ///
    /// The cycle runs on its own task. Dropping the returned future does
    /// not abandon the connections: the cycle still completes, updates
    /// the health of all probes and only then releases the busy flag.
    pub async fn poll_all_probes(&self) -> Result<PollReport, PollError> {
        let cycle = Arc::clone(&self.cycle)
            .try_lock_owned()
            .map_err(|_| PollError::Busy)?;

        let pending: Vec<_> = self
            .lock_slots()
            .iter_mut()
            .map(|slot| (slot.config.clone(), slot.health, slot.connection.take()))
            .collect();

        let connector = Arc::clone(&self.connector);
        let slots = Arc::clone(&self.slots);
        let read_timeout = self.read_timeout;
        let task = tokio::spawn(async move {
            let opened = join_all(pending.into_iter().map(|(config, health, connection)| {
                connect(Arc::clone(&connector), config, health, connection)
            }))
            .await;

            let outcomes = join_all(
                opened
                    .into_iter()
                    .map(|(config, connection)| read(config, connection, read_timeout)),
            )
            .await;

            let report = apply(&slots, outcomes);
            drop(cycle);
            report
        });

        task.await.map_err(|err| {
            log::error!("Poll cycle failed: {}", err);
            PollError::Aborted
        })
    }

    /// Close all connections, waiting for a running poll cycle to finish.
    pub async fn close_all(&self) {
        let _cycle = self.cycle.lock().await;
        for slot in self.lock_slots().iter_mut() {
            if let Some(connection) = slot.connection.take() {
                connection.close();
            }
            slot.health = ProbeHealth::InterfaceError;
        }
    }
}

impl fmt::Debug for ProbePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbePool")
            .field("slots", &*self.lock_slots())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

fn lock_slots(slots: &Mutex<Vec<ProbeSlot>>) -> MutexGuard<'_, Vec<ProbeSlot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn connect(
    connector: Arc<dyn Connector>,
    config: ProbeConfig,
    health: ProbeHealth,
    connection: Option<ProbeConnection>,
) -> (ProbeConfig, Result<ProbeConnection, ProbeError>) {
    if health != ProbeHealth::InterfaceError {
        if let Some(connection) = connection {
            return (config, Ok(connection));
        }
    } else if let Some(stale) = connection {
        stale.close();
    }
    let port = config.port_identifier.clone();
    let task = spawn_blocking(move || ProbeConnection::open(connector.as_ref(), &port));
    let opened = match task.await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(err)) => {
            log::debug!(
                "[{}] Failed to open serial port {}: {}",
                config.name,
                config.port_identifier,
                err
            );
            Err(ProbeError::Interface(err))
        }
        Err(err) => {
            log::error!("[{}] Aborted opening serial port: {}", config.name, err);
            Err(ProbeError::Interface(io::Error::new(io::ErrorKind::Other, err)))
        }
    };
    (config, opened)
}

async fn read(
    config: ProbeConfig,
    connection: Result<ProbeConnection, ProbeError>,
    read_timeout: Duration,
) -> Outcome {
    let mut connection = match connection {
        Ok(connection) => connection,
        Err(err) => return (None, Err(err)),
    };
    let name = config.name.clone();
    let worker = spawn_blocking(move || {
        let res = ProbeSession::new(&config.name, config.address, &mut connection)
            .with_read_timeout(read_timeout)
            .run();
        (connection, res)
    });
    match worker.await {
        Ok((connection, res)) => (Some(connection), res),
        Err(err) => {
            // The connection is lost together with the worker
            log::error!("[{}] Unexpected error: {}", name, err);
            (
                None,
                Err(ProbeError::Interface(io::Error::new(io::ErrorKind::Other, err))),
            )
        }
    }
}

fn apply(slots: &Mutex<Vec<ProbeSlot>>, outcomes: Vec<Outcome>) -> PollReport {
    let mut report = PollReport::default();
    let mut slots = lock_slots(slots);
    for (slot, (connection, res)) in slots.iter_mut().zip(outcomes) {
        let health = match &res {
            Ok(_) => ProbeHealth::Ready,
            Err(err) => err.health(),
        };
        slot.connection = match connection {
            Some(connection) if health == ProbeHealth::InterfaceError => {
                connection.close();
                None
            }
            connection => connection,
        };
        if health != slot.health {
            match &res {
                Ok(_) => log::info!("[{}] {}", slot.config.name, health),
                Err(err) => log::warn!("[{}] {}: {}", slot.config.name, health, err),
            }
            report.changes.push(HealthChange {
                probe_name: slot.config.name.clone(),
                previous: slot.health,
                current: health,
            });
            slot.health = health;
        }
        if let Ok(reading) = res {
            report.readings.push(reading);
        }
    }
    report
}
