//! Radio transport abstraction
//! Every request is fire-and-forget; its outcome comes back later as a
//! `TransportEvent` on the channel handed to the transport at construction.
//! Link-scoped requests and events carry the `LinkId` of the connection
//! attempt they belong to, so reports from an earlier attempt on the same
//! peripheral can be told apart from the current one.

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::{ScanReport, ServiceInfo};

/// Identifies one connection attempt. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Normalized radio callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Advertisement(ScanReport),
    ScanFailed { code: i32 },
    LinkEstablished { link: LinkId },
    LinkFailed { link: LinkId, reason: String },
    ServicesDiscovered { link: LinkId, services: Vec<ServiceInfo> },
    DiscoveryFailed { link: LinkId, reason: String },
    WriteCompleted {
        link: LinkId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    ReadCompleted {
        link: LinkId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    Notification {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// Remote-initiated, radio error or a `disconnect` request.
    /// Never sent for `release`.
    LinkLost { link: LinkId, reason: String },
}

impl TransportEvent {
    /// The attempt this event concerns, if it is link-scoped
    pub fn link(&self) -> Option<LinkId> {
        match self {
            Self::Advertisement(_) | Self::ScanFailed { .. } => None,
            Self::LinkEstablished { link }
            | Self::LinkFailed { link, .. }
            | Self::ServicesDiscovered { link, .. }
            | Self::DiscoveryFailed { link, .. }
            | Self::WriteCompleted { link, .. }
            | Self::ReadCompleted { link, .. }
            | Self::Notification { link, .. }
            | Self::LinkLost { link, .. } => Some(*link),
        }
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport reports its events on
pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Central-role radio operations
pub trait BleTransport: Send + Sync {
    fn start_scan(&self);
    fn stop_scan(&self);
    /// Opens `link` to the peripheral at `address`. A link still closing on
    /// the same address is fully closed first.
    fn connect(&self, link: LinkId, address: &str);
    /// Closes `link` and reports `LinkLost` once it is down
    fn disconnect(&self, link: LinkId);
    /// Closes `link` without reporting; also abandons a pending connect
    fn release(&self, link: LinkId);
    fn discover_services(&self, link: LinkId);
    fn write(&self, link: LinkId, service: Uuid, characteristic: Uuid, value: Vec<u8>);
    fn read(&self, link: LinkId, service: Uuid, characteristic: Uuid);
    fn set_notify(&self, link: LinkId, service: Uuid, characteristic: Uuid, enabled: bool);
}
