//! GATT session state machine
//! Owns one physical link at a time: connect, discovery, characteristic
//! access and disconnect handling. All mutation happens through `&mut self`
//! on the manager task, so no locking is involved.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::profile_config::ProfileConfig;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, EventBus};
use crate::core::bluetooth::transport::{BleTransport, LinkId, TransportEvent};
use crate::core::bluetooth::types::{
    CharacteristicHandle, ConnectionState, DeviceIdentity, FailureReason, Frame, ServiceInfo,
};

/// Result of a successful `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new link attempt was started
    Started,
    /// Already `Ready` with this peripheral; nothing was done
    AlreadyConnected,
}

/// Per-attempt data, created by `connect` and dropped when the attempt ends
struct LinkAttempt {
    id: LinkId,
    identity: DeviceIdentity,
    tx: Option<CharacteristicHandle>,
    rx: Option<CharacteristicHandle>,
    pending_writes: HashSet<Uuid>,
    notifying: HashSet<Uuid>,
}

impl LinkAttempt {
    fn new(id: LinkId, identity: DeviceIdentity) -> Self {
        Self {
            id,
            identity,
            tx: None,
            rx: None,
            pending_writes: HashSet::new(),
            notifying: HashSet::new(),
        }
    }
}

pub struct GattSession {
    transport: Arc<dyn BleTransport>,
    bus: EventBus,
    profile: ProfileConfig,
    state: ConnectionState,
    link: Option<LinkAttempt>,
    links_opened: u64,
}

impl GattSession {
    pub fn new(transport: Arc<dyn BleTransport>, bus: EventBus, profile: ProfileConfig) -> Self {
        Self {
            transport,
            bus,
            profile,
            state: ConnectionState::Idle,
            link: None,
            links_opened: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.link.as_ref().map(|link| &link.identity)
    }

    /// The current attempt, if one is in progress or established
    pub fn link_id(&self) -> Option<LinkId> {
        self.link.as_ref().map(|link| link.id)
    }

    /// Write target; only set while `Ready`
    pub fn tx_handle(&self) -> Option<&CharacteristicHandle> {
        self.link.as_ref().and_then(|link| link.tx.as_ref())
    }

    /// Notify source; only set while `Ready`
    pub fn rx_handle(&self) -> Option<&CharacteristicHandle> {
        self.link.as_ref().and_then(|link| link.rx.as_ref())
    }

    pub fn is_write_pending(&self, handle: &CharacteristicHandle) -> bool {
        self.link
            .as_ref()
            .map(|link| link.pending_writes.contains(&handle.characteristic_uuid))
            .unwrap_or(false)
    }

    pub fn is_notifying(&self, handle: &CharacteristicHandle) -> bool {
        self.link
            .as_ref()
            .map(|link| link.notifying.contains(&handle.characteristic_uuid))
            .unwrap_or(false)
    }

    fn transition(&mut self, state: ConnectionState) {
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        self.bus.emit(BleEvent::StateChanged(state));
    }

    pub fn connect(&mut self, identity: DeviceIdentity) -> Result<ConnectOutcome, BleError> {
        match self.state {
            ConnectionState::Ready => {
                if self.identity() == Some(&identity) {
                    info!("Device {} already connected.", identity);
                    return Ok(ConnectOutcome::AlreadyConnected);
                }
                info!("Tearing down link to {:?} before connecting to {}", self.identity(), identity);
                self.teardown();
            }
            ConnectionState::Connecting | ConnectionState::Discovering => {
                return Err(BleError::InvalidState(self.state.clone()));
            }
            _ => {}
        }

        self.links_opened += 1;
        let id = LinkId::new(self.links_opened);
        info!("Initiating connection to {} ({})...", identity, id);
        let address = identity.address.clone();
        self.link = Some(LinkAttempt::new(id, identity));
        self.transition(ConnectionState::Connecting);
        self.transport.connect(id, &address);
        Ok(ConnectOutcome::Started)
    }

    /// Requests a local disconnect. The state change follows from the
    /// transport's link-loss report.
    pub fn disconnect(&mut self) {
        match self.link.as_ref() {
            Some(link) if self.state.is_attempt_active() => {
                info!("Disconnecting from device {}", link.identity);
                self.transport.disconnect(link.id);
            }
            _ => debug!("Disconnect requested with no active link"),
        }
    }

    /// Closes the link immediately and lands in `Disconnected`
    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            self.transport.release(link.id);
        }
        self.transition(ConnectionState::Disconnected);
        self.bus.emit(BleEvent::Disconnected);
    }

    /// Releases the link without emitting events; used on owner shutdown
    pub fn dispose(&mut self) {
        if let Some(link) = self.link.take() {
            if self.state.is_attempt_active() {
                info!("Releasing link to {}", link.identity);
                self.transport.release(link.id);
            }
        }
        self.state = ConnectionState::Idle;
    }

    fn ready_link(&mut self) -> Result<&mut LinkAttempt, BleError> {
        match (&self.state, self.link.as_mut()) {
            (ConnectionState::Ready, Some(link)) => Ok(link),
            _ => Err(BleError::NotReady),
        }
    }

    /// Starts one write. Completion is consumed internally and not awaited.
    pub fn write_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
        frame: Frame,
    ) -> Result<(), BleError> {
        let link = self.ready_link()?;
        if !link.pending_writes.insert(handle.characteristic_uuid) {
            debug!("Write to {} rejected, previous write pending", handle.characteristic_uuid);
            return Err(BleError::WriteInProgress);
        }
        let id = link.id;

        debug!("Writing {} byte(s) to {}: [{}]", frame.len(), handle.characteristic_uuid, frame);
        self.transport.write(
            id,
            handle.service_uuid,
            handle.characteristic_uuid,
            frame.into_bytes(),
        );
        Ok(())
    }

    pub fn read_characteristic(&mut self, handle: &CharacteristicHandle) -> Result<(), BleError> {
        let id = self.ready_link()?.id;
        debug!("Reading {}", handle.characteristic_uuid);
        self.transport
            .read(id, handle.service_uuid, handle.characteristic_uuid);
        Ok(())
    }

    pub fn set_notifications(
        &mut self,
        handle: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BleError> {
        let link = self.ready_link()?;
        let id = link.id;
        if enabled {
            link.notifying.insert(handle.characteristic_uuid);
        } else {
            link.notifying.remove(&handle.characteristic_uuid);
        }

        info!(
            "{} notifications on {}",
            if enabled { "Enabling" } else { "Disabling" },
            handle.characteristic_uuid
        );
        self.transport.set_notify(
            id,
            handle.service_uuid,
            handle.characteristic_uuid,
            enabled,
        );
        Ok(())
    }

    /// Feeds one transport event through the state machine.
    /// Returns the state entered, if the event caused a transition.
    pub fn handle_event(&mut self, event: &TransportEvent) -> Option<ConnectionState> {
        let link = event.link()?;
        if self.link_id() != Some(link) {
            debug!("Ignoring stale event for {}: {:?}", link, event);
            return None;
        }

        let before = self.state.clone();
        match event {
            TransportEvent::LinkEstablished { .. } => self.on_link_established(),
            TransportEvent::LinkFailed { reason, .. } => self.on_link_failed(reason),
            TransportEvent::ServicesDiscovered { services, .. } => self.on_services(services),
            TransportEvent::DiscoveryFailed { reason, .. } => {
                if self.state == ConnectionState::Discovering {
                    error!("Service discovery failed: {}", reason);
                    self.fail(FailureReason::DiscoveryFailed(reason.clone()));
                }
            }
            TransportEvent::WriteCompleted {
                characteristic,
                result,
                ..
            } => {
                if let Some(link) = self.link.as_mut() {
                    link.pending_writes.remove(characteristic);
                }
                match result {
                    Ok(()) => debug!("Write to {} completed", characteristic),
                    Err(e) => warn!("Write to {} failed: {}", characteristic, e),
                }
            }
            TransportEvent::LinkLost { reason, .. } => self.on_link_lost(reason),
            TransportEvent::ReadCompleted { .. } | TransportEvent::Notification { .. } => {}
            TransportEvent::Advertisement(_) | TransportEvent::ScanFailed { .. } => {}
        }

        (self.state != before).then(|| self.state.clone())
    }

    fn on_link_established(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Link established outside Connecting, ignored");
            return;
        }
        let Some(identity) = self.identity().cloned() else {
            return;
        };
        info!("Connection successful, discovering services...");
        self.bus.emit(BleEvent::Connected(identity));
        self.discover_services();
    }

    fn discover_services(&mut self) {
        let Some(id) = self.link_id() else {
            return;
        };
        self.transition(ConnectionState::Discovering);
        self.transport.discover_services(id);
    }

    fn on_services(&mut self, services: &[ServiceInfo]) {
        if self.state != ConnectionState::Discovering {
            debug!("Services discovered outside Discovering, ignored");
            return;
        }

        match self.profile.resolve(services) {
            Some(handle) => {
                info!(
                    "Found serial characteristic {} in service {}",
                    handle.characteristic_uuid, handle.service_uuid
                );
                if let Some(link) = self.link.as_mut() {
                    // one bidirectional characteristic serves both directions
                    link.tx = Some(handle.clone());
                    link.rx = Some(handle);
                }
                self.transition(ConnectionState::Ready);
                self.bus.emit(BleEvent::ServicesReady);
            }
            None => {
                for service in services {
                    info!("Available service: {}", service.uuid);
                }
                error!(
                    "Serial characteristic not found: {}",
                    self.profile.characteristic_uuid
                );
                self.fail(FailureReason::MissingCharacteristic);
            }
        }
    }

    fn on_link_failed(&mut self, reason: &str) {
        match self.state {
            ConnectionState::Connecting => {
                warn!("Connection attempt failed: {}", reason);
                self.link = None;
                self.transition(ConnectionState::Failed(FailureReason::LinkFailed(
                    reason.to_string(),
                )));
                self.transition(ConnectionState::Disconnected);
                self.bus.emit(BleEvent::Disconnected);
            }
            ConnectionState::Discovering => {
                self.fail(FailureReason::LinkFailed(reason.to_string()));
            }
            _ => debug!("Link failure outside an attempt, ignored: {}", reason),
        }
    }

    fn on_link_lost(&mut self, reason: &str) {
        match self.state {
            ConnectionState::Ready => {
                info!("Link lost: {}", reason);
                self.link = None;
                self.transition(ConnectionState::Disconnected);
                self.bus.emit(BleEvent::Disconnected);
            }
            ConnectionState::Connecting | ConnectionState::Discovering => {
                self.on_link_failed(reason);
            }
            _ => debug!("Link loss outside an attempt, ignored: {}", reason),
        }
    }

    /// Ends the attempt in `Failed`, releasing whatever link exists
    fn fail(&mut self, reason: FailureReason) {
        if let Some(link) = self.link.take() {
            self.transport.release(link.id);
        }
        self.transition(ConnectionState::Failed(reason));
    }
}

impl Drop for GattSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
