//! BLE serial link library
//! Central-role link to a single BLE serial peripheral: scan by name,
//! connect, resolve the serial characteristic and exchange frames.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
mod utils;
