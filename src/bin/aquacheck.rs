use aquacheck::{
    core::sdi12::Address,
    sdi12::{serial::SerialConnector, Connector, ProbeConnection},
    Config, Notification, ProbePool, ProbeSession, Service,
};

use clap::Parser;
use env_logger::Env;
use std::{error::Error, path::PathBuf, sync::Arc};

#[derive(Debug, Parser)]
#[command(version, about = "Read AquaCheck soil probes on serial ports")]
struct Args {
    /// Configuration file with the probes to read
    #[arg(short, long, value_name = "FILE", required_unless_present = "probe_test")]
    config: Option<PathBuf>,

    /// Read all probes once and exit
    #[arg(long)]
    once: bool,

    /// Identify and read a single probe on the given serial port
    #[arg(long, value_name = "PORT", conflicts_with_all = ["config", "once"])]
    probe_test: Option<String>,

    /// Bus address of the probe for --probe-test
    #[arg(long, default_value_t = 0, requires = "probe_test")]
    address: u8,
}

fn print_notification(readings: &Notification) {
    match serde_json::to_string(readings) {
        Ok(json) => println!("{}", json),
        Err(err) => log::error!("Failed to serialize readings: {}", err),
    }
}

fn probe_test(port: &str, address: Address) -> Result<(), Box<dyn Error>> {
    let mut connection = ProbeConnection::open(&SerialConnector, port)?;
    let res = ProbeSession::new(port, address, &mut connection).run();
    if let Some(identification) = connection.identification() {
        println!("{}", identification);
    }
    let reading = res?;
    println!("SOIL MOISTURE: {:?}", reading.moisture_values);
    println!("TEMPERATURE:   {:?}", reading.temperature_values);
    connection.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(port) = args.probe_test {
        let address = Address::try_from(args.address)?;
        return tokio::task::spawn_blocking(move || {
            probe_test(&port, address).map_err(|err| err.to_string())
        })
        .await?
        .map_err(Into::into);
    }

    let Some(config_path) = args.config else {
        return Err("Missing configuration file".into());
    };
    let config = Config::load(&config_path)?;
    let connector: Arc<dyn Connector> = Arc::new(SerialConnector);

    if args.once {
        let pool = ProbePool::new(config.probes.iter().cloned(), connector);
        let report = pool.poll_all_probes().await?;
        print_notification(&report.readings);
        pool.close_all().await;
        return Ok(());
    }

    let (mut service, mut notifications) = Service::new(&config, connector);
    service.start();
    loop {
        tokio::select! {
            Some(readings) = notifications.recv() => print_notification(&readings),
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    log::error!("Failed to listen for shutdown signal: {}", err);
                }
                break;
            }
        }
    }
    service.stop().await;
    Ok(())
}
