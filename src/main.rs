use std::path::PathBuf;

use anyhow::Result;
use ble_serial_link::commands;
use ble_serial_link::config::AppConfig;
use ble_serial_link::core::bluetooth::{BleError, BleEvent, ConnectionState};
use ble_serial_link::logging;
use ble_serial_link::state::AppState;
use log::{error, info, warn};

const CONFIG_ENV: &str = "BLE_LINK_CONFIG";

/// Sent once the link is ready
const GREETING_FRAME: [u8; 3] = [0x4B, 0x01, 0x4E];

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(log::LevelFilter::Info);

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => AppConfig::load_config(&PathBuf::from(path)).await?,
        None => AppConfig::default(),
    };

    let app_state = AppState::new(config).await?;
    let mut events = app_state.bluetooth_manager.subscribe();

    commands::start_scan(&app_state, None, None)
        .await
        .map_err(anyhow::Error::msg)?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !handle_event(&app_state, event).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    app_state.bluetooth_manager.shutdown().await;
    Ok(())
}

/// Returns false when the demo should exit
async fn handle_event(app_state: &AppState, event: BleEvent) -> bool {
    match event {
        BleEvent::DeviceFound(identity) => {
            info!("Found {}", identity);
            if !app_state.config.scan.auto_connect {
                if let Err(e) = commands::connect(app_state, identity).await {
                    error!("Connect failed: {}", e);
                    return false;
                }
            }
        }
        BleEvent::ScanFailed(code) => {
            error!("{}", BleError::ScanFailed(code));
            return false;
        }
        BleEvent::Connected(identity) => info!("{} connected", identity),
        BleEvent::ServicesReady => {
            if let Err(e) = commands::send(app_state, GREETING_FRAME.to_vec()).await {
                warn!("Send failed: {}", e);
            }
        }
        BleEvent::DataReceived(frame) => info!("Received [{}]", frame),
        BleEvent::StateChanged(ConnectionState::Failed(reason)) => {
            error!("Connection failed: {}", BleError::from(reason));
        }
        BleEvent::StateChanged(state) => info!("State: {:?}", state),
        BleEvent::Disconnected => {
            warn!("Bluetooth disconnected!");
            return false;
        }
    }
    true
}
