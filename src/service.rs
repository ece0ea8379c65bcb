use crate::{
    config::Config,
    core::ProbeHealth,
    pool::{PollError, PollReport, ProbePool},
    sdi12::Connector,
    session::Reading,
    ProbeMonitor,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use stream_cancel::{StreamExt as _, Trigger, Tripwire};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

/// All readings of a single poll cycle.
pub type Notification = Vec<Reading>;

/// Reads all probes periodically and on demand, and publishes the
/// readings of every completed cycle.
pub struct Service {
    pool: Arc<ProbePool>,
    read_interval: Duration,
    notifier: mpsc::UnboundedSender<Notification>,
    ticker: Option<(Trigger, JoinHandle<()>)>,
}

impl Service {
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let pool = ProbePool::new(config.probes.iter().cloned(), connector);
        Self::with_pool(Arc::new(pool), config.read_interval())
    }

    pub fn with_pool(
        pool: Arc<ProbePool>,
        read_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, notifications) = mpsc::unbounded_channel();
        let service = Self {
            pool,
            read_interval,
            notifier,
            ticker: None,
        };
        (service, notifications)
    }

    pub fn pool(&self) -> &Arc<ProbePool> {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Start reading periodically, beginning immediately.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        log::info!(
            "Reading {} probe(s) every {} seconds",
            self.pool.probes().len(),
            self.read_interval.as_secs()
        );
        let (trigger, tripwire) = Tripwire::new();
        let pool = Arc::clone(&self.pool);
        let notifier = self.notifier.clone();
        let read_interval = self.read_interval;
        let handle = tokio::spawn(async move {
            run_periodic(pool, notifier, read_interval, tripwire).await;
        });
        self.ticker = Some((trigger, handle));
    }

    /// Cancel periodic reads and close all connections.
    ///
    /// A poll cycle that is still running is completed first.
    pub async fn stop(&mut self) {
        if let Some((trigger, handle)) = self.ticker.take() {
            trigger.cancel();
            if let Err(err) = handle.await {
                log::error!("Periodic reads terminated abnormally: {}", err);
            }
        }
        self.pool.close_all().await;
        log::info!("Stopped");
    }
}

async fn run_periodic(
    pool: Arc<ProbePool>,
    notifier: mpsc::UnboundedSender<Notification>,
    read_interval: Duration,
    tripwire: Tripwire,
) {
    let mut timer = interval(read_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ticks = stream::unfold(timer, |mut timer| async move {
        timer.tick().await;
        Some(((), timer))
    })
    .take_until_if(tripwire);
    futures::pin_mut!(ticks);
    while ticks.next().await.is_some() {
        if let Err(err) = read_and_notify(&pool, &notifier).await {
            log::warn!("Skipping scheduled read: {}", err);
        }
    }
    log::debug!("Periodic reads cancelled");
}

async fn read_and_notify(
    pool: &ProbePool,
    notifier: &mpsc::UnboundedSender<Notification>,
) -> Result<PollReport, PollError> {
    let report = pool.poll_all_probes().await?;
    if notifier.send(report.readings.clone()).is_err() {
        log::warn!("Dropping {} reading(s) without receiver", report.readings.len());
    }
    Ok(report)
}

#[async_trait]
impl ProbeMonitor for Service {
    async fn on_demand_read(&self) -> Result<PollReport, PollError> {
        log::info!("Received \"read\" command");
        read_and_notify(&self.pool, &self.notifier)
            .await
            .map_err(|err| {
                log::warn!("{}", err);
                err
            })
    }

    async fn periodic_tick(&self) -> Result<PollReport, PollError> {
        read_and_notify(&self.pool, &self.notifier).await
    }

    fn current_state(&self) -> BTreeMap<String, ProbeHealth> {
        self.pool.current_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ProbeConfig,
        mock::{MockConnector, ScriptedTransport},
    };

    const ID: &str = "013AquaChckACHSDI043S012345\r\n";

    fn cycle() -> Vec<&'static str> {
        vec!["0001\r\n", "+10.5\r\n", "0001\r\n", "+21.0\r\n"]
    }

    fn service(
        transport: ScriptedTransport,
        read_interval: Duration,
    ) -> (Service, mpsc::UnboundedReceiver<Notification>) {
        let connector = MockConnector::new();
        connector.insert("/dev/ttyTZ1", transport);
        let pool = ProbePool::new(
            vec![ProbeConfig::new("Zone", "/dev/ttyTZ1")],
            Arc::new(connector),
        )
        .with_read_timeout(Duration::ZERO);
        Service::with_pool(Arc::new(pool), read_interval)
    }

    #[tokio::test]
    async fn notify_on_demand() {
        let (service, mut notifications) =
            service(ScriptedTransport::new(vec![ID]).then(cycle()), Duration::from_secs(360));
        assert_eq!(
            Some(&ProbeHealth::InterfaceError),
            service.current_state().get("Zone")
        );

        let report = service.on_demand_read().await.unwrap();
        assert_eq!(1, report.readings.len());

        let notification = notifications.recv().await.unwrap();
        assert_eq!(1, notification.len());
        assert_eq!("Zone", notification[0].probe_name);
        assert_eq!(vec![10.5], notification[0].moisture_values);
        assert_eq!(vec![21.0], notification[0].temperature_values);
        assert_eq!(Some(&ProbeHealth::Ready), service.current_state().get("Zone"));
    }

    #[tokio::test]
    async fn notify_empty_cycles() {
        let (service, mut notifications) =
            service(ScriptedTransport::default(), Duration::from_secs(360));
        let report = service.periodic_tick().await.unwrap();
        assert!(report.readings.is_empty());
        assert!(notifications.recv().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_periodically_until_stopped() {
        let (mut service, mut notifications) = service(
            ScriptedTransport::new(vec![ID])
                .then(cycle())
                .then(cycle()),
            Duration::from_secs(180),
        );
        service.start();
        assert!(service.is_running());

        // Immediately after starting
        assert_eq!(1, notifications.recv().await.unwrap().len());
        // After one interval
        assert_eq!(1, notifications.recv().await.unwrap().len());

        service.stop().await;
        assert!(!service.is_running());
        assert_eq!(
            Some(&ProbeHealth::InterfaceError),
            service.current_state().get("Zone")
        );
    }

    #[test]
    fn serialize_notification() {
        let reading = Reading::new("Zone", vec![10.5, 11.0], vec![21.0]);
        let json = serde_json::to_value(vec![reading]).unwrap();
        assert_eq!(
            serde_json::json!([{
                "name": "Zone",
                "moisture_values": [10.5, 11.0],
                "temperature_values": [21.0],
            }]),
            json
        );
    }
}
