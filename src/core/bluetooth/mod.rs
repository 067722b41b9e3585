//! Bluetooth functionality for the serial link
//! This module handles scanning for the peripheral, the GATT session that
//! owns the link, and the data channel exchanging frames over it.

pub(crate) mod bluest_transport;
pub(crate) mod channel;
pub(crate) mod connection;
pub(crate) mod constants;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod fake;
pub(crate) mod filter;
pub(crate) mod manager;
pub(crate) mod notification;
pub(crate) mod scanner;
pub(crate) mod session;
pub(crate) mod transport;
pub(crate) mod types;

// Re-export types that should be publicly accessible
pub use bluest_transport::{BluestTransport, extract_mac_address};
pub use channel::DataChannel;
pub use constants::*; // Re-export all constants
pub use error::BleError;
pub use events::{BleEvent, EventBus, EventSubscription, SubscriptionId};
#[doc(hidden)]
pub use fake::{FakeTransport, TransportCall};
pub use filter::{AdvertisementFilter, NameMatch};
pub use manager::BluetoothManager;
pub use scanner::{BluetoothScanner, ScannerState};
pub use session::{ConnectOutcome, GattSession};
pub use transport::{
    BleTransport, LinkId, TransportEvent, TransportEventReceiver, TransportEventSender,
    transport_channel,
};
pub use types::{
    CharacteristicHandle, CharacteristicInfo, CharacteristicProperties, ConnectionState,
    DeviceIdentity, FailureReason, Frame, ScanReport, ServiceInfo,
};
