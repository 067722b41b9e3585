//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Identity of the peripheral captured from the first matching advertisement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    /// The advertised name of the device
    pub name: String,
    /// The address of the device (MAC address on most platforms, the platform id otherwise)
    pub address: String,
}

impl DeviceIdentity {
    /// Creates a new DeviceIdentity instance
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Why a connection attempt ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// The physical link could not be established or was lost before discovery finished
    LinkFailed(String),
    /// Service discovery itself failed
    DiscoveryFailed(String),
    /// No resolved service exposes the serial characteristic
    MissingCharacteristic,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkFailed(reason) => write!(f, "link failed: {}", reason),
            Self::DiscoveryFailed(reason) => write!(f, "discovery failed: {}", reason),
            Self::MissingCharacteristic => write!(f, "missing serial characteristic"),
        }
    }
}

/// Connection lifecycle of a GATT session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Discovering,
    Ready,
    Disconnected,
    Failed(FailureReason),
}

impl ConnectionState {
    /// True while a connection attempt is in progress or established
    pub fn is_attempt_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Discovering | Self::Ready)
    }
}

/// Capabilities a remote characteristic advertises
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Properties of a read/write/notify serial characteristic
    pub fn serial() -> Self {
        Self {
            read: true,
            write: true,
            write_without_response: true,
            notify: true,
        }
    }
}

/// A remote characteristic resolved during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicHandle {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl CharacteristicHandle {
    pub fn can_write(&self) -> bool {
        self.properties.write || self.properties.write_without_response
    }

    pub fn can_notify(&self) -> bool {
        self.properties.notify
    }
}

/// Characteristic as reported by the transport during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Service as reported by the transport during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// An opaque payload exchanged over the serial characteristic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// A single advertisement report, consumed by the filter and discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Advertised local name, if the report carried a readable one
    pub name: Option<String>,
    pub address: String,
    /// The signal strength (RSSI) of the report
    pub rssi: Option<i16>,
}

impl ScanReport {
    pub fn new(name: Option<String>, address: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            name,
            address: address.into(),
            rssi,
        }
    }
}
