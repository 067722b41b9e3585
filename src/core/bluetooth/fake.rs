//! In-memory transport
//! Records every request and lets the caller play the radio's part by
//! injecting `TransportEvent`s. Used by the test suites and dry runs.

use std::sync::{Mutex, MutexGuard};

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::transport::{
    BleTransport, LinkId, TransportEvent, TransportEventSender,
};

/// A request the transport received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartScan,
    StopScan,
    Connect { link: LinkId, address: String },
    Disconnect(LinkId),
    Release(LinkId),
    DiscoverServices(LinkId),
    Write {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Read {
        link: LinkId,
        characteristic: Uuid,
    },
    SetNotify {
        link: LinkId,
        characteristic: Uuid,
        enabled: bool,
    },
}

pub struct FakeTransport {
    events: TransportEventSender,
    calls: Mutex<Vec<TransportCall>>,
}

impl FakeTransport {
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            events,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TransportCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: TransportCall) {
        debug!("Fake transport received {:?}", call);
        self.lock().push(call);
    }

    /// Plays a radio callback
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.lock())
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Links requested so far, oldest first
    pub fn links(&self) -> Vec<LinkId> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Connect { link, .. } => Some(*link),
                _ => None,
            })
            .collect()
    }

    /// The most recently requested link
    pub fn last_link(&self) -> Option<LinkId> {
        self.links().last().copied()
    }
}

impl BleTransport for FakeTransport {
    fn start_scan(&self) {
        self.record(TransportCall::StartScan);
    }

    fn stop_scan(&self) {
        self.record(TransportCall::StopScan);
    }

    fn connect(&self, link: LinkId, address: &str) {
        self.record(TransportCall::Connect {
            link,
            address: address.to_string(),
        });
    }

    fn disconnect(&self, link: LinkId) {
        self.record(TransportCall::Disconnect(link));
    }

    fn release(&self, link: LinkId) {
        self.record(TransportCall::Release(link));
    }

    fn discover_services(&self, link: LinkId) {
        self.record(TransportCall::DiscoverServices(link));
    }

    fn write(&self, link: LinkId, _service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        self.record(TransportCall::Write {
            link,
            characteristic,
            value,
        });
    }

    fn read(&self, link: LinkId, _service: Uuid, characteristic: Uuid) {
        self.record(TransportCall::Read {
            link,
            characteristic,
        });
    }

    fn set_notify(&self, link: LinkId, _service: Uuid, characteristic: Uuid, enabled: bool) {
        self.record(TransportCall::SetNotify {
            link,
            characteristic,
            enabled,
        });
    }
}
