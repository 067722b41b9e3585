//! Application state management
//! This module defines and manages the state shared with the UI layer.

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::core::BluetoothManager;

/// Global application state
pub struct AppState {
    /// Handle to the Bluetooth manager task
    pub bluetooth_manager: BluetoothManager,
    pub config: AppConfig,
}

impl AppState {
    /// Creates a new AppState on top of the default adapter
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let manager = BluetoothManager::with_bluest(config.clone()).await?;
        Ok(Self::with_manager(manager, config))
    }

    /// Wraps an already running manager
    pub fn with_manager(bluetooth_manager: BluetoothManager, config: AppConfig) -> Self {
        Self {
            bluetooth_manager,
            config,
        }
    }
}
