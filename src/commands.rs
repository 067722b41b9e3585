//! UI commands
//! This module defines the operations a UI layer may invoke. Errors are
//! rendered to strings for display; results of radio work arrive as events.

use std::time::Duration;

use crate::core::bluetooth::{BleEvent, SubscriptionId};
use crate::core::DeviceIdentity;
use crate::state::AppState;

/// Starts a scan for `target_name`, or the configured target when `None`
///
/// # Returns
/// Nothing, but emits events during scanning:
/// - `DeviceFound` when the target advertises
/// - `ScanFailed` when the radio refuses the scan
///
/// The window closes silently after `timeout_ms` (configured default when `None`).
pub async fn start_scan(
    app_state: &AppState,
    target_name: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<(), String> {
    let target_name = target_name.unwrap_or(&app_state.config.scan.target_name);
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| app_state.config.scan.timeout());

    app_state
        .bluetooth_manager
        .start_scan(target_name, timeout)
        .await
        .map_err(|e| e.to_string())
}

pub async fn stop_scan(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth_manager
        .stop_scan()
        .await
        .map_err(|e| e.to_string())
}

/// Connects to a device found by a scan
///
/// # Arguments
/// * `identity` - The identity reported by `DeviceFound`
pub async fn connect(app_state: &AppState, identity: DeviceIdentity) -> Result<(), String> {
    app_state
        .bluetooth_manager
        .connect(identity)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Sends raw bytes to the connected peripheral
pub async fn send(app_state: &AppState, bytes: Vec<u8>) -> Result<(), String> {
    app_state
        .bluetooth_manager
        .send(bytes)
        .await
        .map_err(|e| e.to_string())
}

pub fn on_event<F>(app_state: &AppState, callback: F) -> SubscriptionId
where
    F: FnMut(BleEvent) + Send + 'static,
{
    app_state.bluetooth_manager.on_event(callback)
}

pub fn off_event(app_state: &AppState, id: SubscriptionId) {
    app_state.bluetooth_manager.off_event(id);
}
