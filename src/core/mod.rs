//! Core functionality for the serial link
//! This module contains the link layer to the BLE serial peripheral

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleEvent, BleError, BluetoothManager, ConnectionState, DeviceIdentity, Frame};
