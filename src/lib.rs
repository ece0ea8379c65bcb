//! Poll AquaCheck soil moisture and temperature probes that are attached
//! to serial ports and speak an SDI-12 like ASCII protocol.

/// Protocol and domain types without any I/O
pub mod core;

pub use self::core::*;

pub mod config;
pub mod pool;
pub mod sdi12;
pub mod service;
pub mod session;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use self::{
    config::{Config, ConfigError, ProbeConfig},
    pool::{HealthChange, PollError, PollReport, ProbePool},
    service::{Notification, Service},
    session::{ProbeError, ProbeSession, Reading},
};

use async_trait::async_trait;
use std::collections::BTreeMap;

/// Asynchronous interface for hosts that trigger and observe reads
/// of the configured probes.
#[async_trait]
pub trait ProbeMonitor {
    /// Read all probes now, unless a read is already in progress.
    async fn on_demand_read(&self) -> Result<PollReport, PollError>;

    /// Read all probes on behalf of an external scheduler.
    async fn periodic_tick(&self) -> Result<PollReport, PollError>;

    /// The current health of every configured probe.
    fn current_state(&self) -> BTreeMap<String, ProbeHealth>;
}
