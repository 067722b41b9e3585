//! Constants used throughout the link layer
//! This module contains the constant values of the serial peripheral profile,
//! such as UUIDs, timeouts, and other default configuration values.

use uuid::Uuid;

/// Advertised name of the reference peripheral
pub const DEFAULT_TARGET_NAME: &str = "SSONG";

/// Vendor serial service (HM-10 style modules)
pub const UUID_SERIAL_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// The single bidirectional serial characteristic. It is both the write
/// target (TX) and the notify source (RX) of this profile.
pub const UUID_SERIAL_RX_TX: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Scan window in milliseconds. The radio has no intrinsic scan timeout.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 100_000;

/// Interval between link liveness checks in milliseconds
pub const DEFAULT_LINK_POLL_INTERVAL_MS: u64 = 1000;

/// Capacity of the manager command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

/// Scan failure codes surfaced in `ScanFailed`
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;
pub const SCAN_FAILED_FEATURE_UNSUPPORTED: i32 = 4;
pub const SCAN_FAILED_ADAPTER_UNAVAILABLE: i32 = 5;
pub const SCAN_FAILED_NOT_AUTHORIZED: i32 = 6;
