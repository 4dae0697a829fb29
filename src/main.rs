mod bluetooth;
mod calculations;
mod config;
mod models;
mod mqtt;
mod status;
mod utils;
mod watchdog;

use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};

use bluetooth::link::BluerLink;
use bluetooth::session::{ScaleSessionController, SessionTiming};
use config::BridgeConfig;
use mqtt::operations::{boot_messages, cycle_messages, MqttPublisher};
use mqtt::TelemetryPublisher;
use status::{ConsoleStatus, StatusIndicator};
use watchdog::{HardwareWatchdog, NullWatchdog, Watchdog};

async fn main_loop(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting smart scale bridge");

    let watchdog: Arc<dyn Watchdog> = match &config.watchdog_device {
        Some(path) => {
            let device = HardwareWatchdog::open(Path::new(path))?;
            info!("Feeding hardware watchdog at {}", path);
            Arc::new(device)
        }
        None => {
            info!("No watchdog device configured");
            Arc::new(NullWatchdog)
        }
    };
    let status: Arc<dyn StatusIndicator> = Arc::new(ConsoleStatus::new());
    let publisher: Arc<dyn TelemetryPublisher> = Arc::new(MqttPublisher::new(config.mqtt.clone()));
    let link = Arc::new(BluerLink::new().await?);

    let boot_count = utils::next_boot_count(Path::new(&config.boot_count_file));
    let boot_time = utils::local_now();
    info!("Boot {} at {}", boot_count, utils::format_datetime(&boot_time));

    if let Err(e) = publisher
        .publish(&boot_messages(&config.root_topic, boot_count, &boot_time))
        .await
    {
        warn!("Failed to publish boot telemetry: {}", e);
    }

    let controller = ScaleSessionController::new(
        link,
        publisher.clone(),
        watchdog,
        status,
        config.users.clone(),
        config.device_name.clone(),
        config.root_topic.clone(),
        SessionTiming {
            settle_secs: config.settle_secs,
            collect_secs: config.collect_secs,
        },
    );

    let mut loop_count: u64 = 0;
    loop {
        if let Err(e) = controller.run_cycle().await {
            error!("Session cycle aborted: {}", e);
        }

        let memory = utils::resident_memory_bytes();
        if let Some(bytes) = memory {
            info!("Resident memory: {} KiB", bytes / 1024);
        }

        if let Err(e) = publisher
            .publish(&cycle_messages(&config.root_topic, loop_count, memory))
            .await
        {
            warn!("Failed to publish cycle telemetry: {}", e);
        }

        loop_count += 1;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match BridgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        let _ = tx.send(());
    });

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
