//! Error kinds of the link layer

use thiserror::Error;

use crate::core::bluetooth::types::{ConnectionState, FailureReason};

/// Errors returned synchronously by link operations.
///
/// Transport-originated failures never appear here; they are surfaced as a
/// `Failed` state transition and an event instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("a scan session is already active")]
    AlreadyScanning,
    #[error("scan failed with code {0}")]
    ScanFailed(i32),
    #[error("operation not valid in state {0:?}")]
    InvalidState(ConnectionState),
    #[error("peripheral does not expose the serial characteristic")]
    MissingCharacteristic,
    #[error("link failed: {0}")]
    LinkFailed(String),
    #[error("session is not ready")]
    NotReady,
    #[error("a write is already in flight on this characteristic")]
    WriteInProgress,
    #[error("send rejected: previous frame still in flight")]
    SendRejected,
    #[error("no device to reconnect to")]
    NoKnownDevice,
    #[error("bluetooth manager task has stopped")]
    ManagerClosed,
}

impl From<FailureReason> for BleError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::MissingCharacteristic => Self::MissingCharacteristic,
            FailureReason::LinkFailed(reason) | FailureReason::DiscoveryFailed(reason) => {
                Self::LinkFailed(reason)
            }
        }
    }
}
