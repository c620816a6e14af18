use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{after, bounded, never, select, tick};
use spectro_capture::{open_serial, Packet, SerialSettings, SessionConfig};
use tracing::{error, info};

mod args;
mod monitoring;

use args::{convert_filter, Args};
use monitoring::Monitor;

// Warn about a missing reply after this many quiet report intervals
const STALL_REPORTS: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let config = SessionConfig {
        history_capacity: args.capacity.into(),
        acquisition: args.acquisition(),
        ..Default::default()
    };
    config.validate()?;

    let mut session = open_serial(&SerialSettings::new(&args.port), &config)?;
    let engine = session.engine().clone();

    // Ctrl-C just tells the main loop to wind down
    let (stop_sender, stop) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_sender.try_send(());
    })?;

    engine.request_sensor_id()?;
    engine.request_wavelengths()?;
    engine.start()?;

    let interval = Duration::from_secs(args.report_interval);
    let ticker = tick(interval);
    let deadline = if args.duration > 0 {
        after(Duration::from_secs(args.duration))
    } else {
        never()
    };
    let mut monitor = Monitor::new(args.channel, interval * STALL_REPORTS);

    loop {
        select! {
            recv(ticker) -> _ => {
                if !session.is_alive() {
                    error!("Lost the sensor");
                    break;
                }
                monitor.report(&engine);
            }
            recv(session.info_packets()) -> packet => match packet {
                Ok(Packet::SensorId(id)) => info!(%id, "Sensor id"),
                Ok(Packet::Wavelength(table)) => info!(
                    channels = table.len(),
                    first = ?table.first(),
                    last = ?table.last(),
                    "Wavelength table"
                ),
                Ok(other) => info!(?other, "Sensor reply"),
                // Sender goes away with the receive thread
                Err(_) => {
                    error!("Lost the sensor");
                    break;
                }
            },
            recv(stop) -> _ => {
                info!("Interrupted");
                break;
            }
            recv(deadline) -> _ => break,
        }
    }

    engine.stop();
    monitor.report(&engine);
    session.close()?;
    Ok(())
}
