//! bluest-backed radio transport
//! Each request is spawned onto the runtime captured at construction and
//! reports back through the transport event channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use bluest::error::ErrorKind;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::connection::{ConnectionManager, LinkState, PendingClose};
use crate::core::bluetooth::constants::{
    SCAN_FAILED_ADAPTER_UNAVAILABLE, SCAN_FAILED_FEATURE_UNSUPPORTED, SCAN_FAILED_INTERNAL_ERROR,
    SCAN_FAILED_NOT_AUTHORIZED,
};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::transport::{BleTransport, LinkId, TransportEvent, TransportEventSender};
use crate::core::bluetooth::types::ScanReport;

type DeviceMap = Arc<Mutex<HashMap<String, Device>>>;
type LinkMap = Arc<Mutex<HashMap<LinkId, LinkState>>>;
/// Per address, fired once the last link closed on it is fully down
type ClosingMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a connect task ends once `connect_device` has returned
enum ConnectOutcome {
    Up,
    Failed(String),
    Abandoned(PendingClose),
}

pub struct BluestTransport {
    adapter: Adapter,
    runtime: Handle,
    events: TransportEventSender,
    connection_manager: ConnectionManager,
    /// Devices seen while scanning, keyed by address
    devices: DeviceMap,
    /// Pending and open links
    links: LinkMap,
    closing: ClosingMap,
    scan_cancel: Mutex<Option<CancellationToken>>,
}

impl BluestTransport {
    /// Captures the current tokio runtime; fails outside one
    pub fn new(
        adapter: Adapter,
        events: TransportEventSender,
        link_poll_interval: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            connection_manager: ConnectionManager::new(adapter.clone(), link_poll_interval),
            adapter,
            runtime: Handle::try_current()?,
            events,
            devices: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            closing: Arc::new(Mutex::new(HashMap::new())),
            scan_cancel: Mutex::new(None),
        })
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn link_device(&self, link: LinkId) -> Option<Device> {
        lock(&self.links)
            .get(&link)
            .filter(|state| state.established)
            .map(|state| state.device.clone())
    }

    fn link_characteristic(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<bluest::Characteristic> {
        lock(&self.links)
            .get(&link)
            .and_then(|state| state.characteristics.get(&(service, characteristic)).cloned())
    }

    /// Scans with bluest until cancelled, reporting every advertisement
    async fn scan_task(
        adapter: Adapter,
        devices: DeviceMap,
        events: TransportEventSender,
        cancel: CancellationToken,
    ) {
        // a peripheral the platform already holds a link to does not advertise
        info!("Checking for connected devices");
        match adapter.connected_devices().await {
            Ok(connected) => {
                for device in connected {
                    let report = Self::register_device(&devices, &device, None, None);
                    let _ = events.send(TransportEvent::Advertisement(report));
                }
            }
            Err(e) => warn!("Could not list connected devices: {}", e),
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                let _ = events.send(TransportEvent::ScanFailed {
                    code: scan_failure_code(&e),
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        let report = Self::register_device(
                            &devices,
                            &discovered.device,
                            discovered.adv_data.local_name.clone(),
                            discovered.rssi,
                        );
                        if events.send(TransportEvent::Advertisement(report)).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    info!("Scan task was cancelled successfully.");
                    break;
                }
            }
        }
    }

    fn register_device(
        devices: &DeviceMap,
        device: &Device,
        advertised_name: Option<String>,
        rssi: Option<i16>,
    ) -> ScanReport {
        let id = device.id().to_string();
        let address = extract_mac_address(&id).unwrap_or_else(|| id.clone());
        let name = advertised_name.or_else(|| device.name().ok());
        debug!("Found device - Address: {}, Name: {:?}, RSSI: {:?}", address, name, rssi);

        lock(devices).insert(address.clone(), device.clone());
        ScanReport::new(name, address, rssi)
    }

    /// Brings `link` up once any earlier link to the same address is down.
    /// A close requested meanwhile is carried out here.
    async fn connect_task(
        manager: ConnectionManager,
        links: LinkMap,
        events: TransportEventSender,
        link: LinkId,
        device: Device,
        previous_close: Option<CancellationToken>,
        cancel: CancellationToken,
    ) {
        if let Some(previous) = previous_close {
            debug!("Waiting for the previous link to {} to close", device.id());
            previous.cancelled().await;
        }

        let result = if cancel.is_cancelled() {
            Err("abandoned before connecting".to_string())
        } else {
            manager.connect(&device).await.map_err(|e| e.to_string())
        };

        let outcome = {
            let mut links = lock(&links);
            let pending_close = links
                .get_mut(&link)
                .and_then(|state| state.pending_close.take());
            match (pending_close, result) {
                (Some(close), _) => {
                    links.remove(&link);
                    ConnectOutcome::Abandoned(close)
                }
                (None, Ok(())) => match links.get_mut(&link) {
                    Some(state) => {
                        state.established = true;
                        ConnectOutcome::Up
                    }
                    None => ConnectOutcome::Failed("link dropped while connecting".to_string()),
                },
                (None, Err(reason)) => {
                    links.remove(&link);
                    ConnectOutcome::Failed(reason)
                }
            }
        };

        match outcome {
            ConnectOutcome::Up => {
                let _ = events.send(TransportEvent::LinkEstablished { link });
                if manager.watch_link(device, link, events, cancel.clone()).await {
                    lock(&links).remove(&link);
                    cancel.cancel();
                }
            }
            ConnectOutcome::Failed(reason) => {
                error!("Connection {} failed: {}", link, reason);
                let _ = events.send(TransportEvent::LinkFailed { link, reason });
            }
            ConnectOutcome::Abandoned(close) => {
                let _done = close.done.drop_guard();
                info!("Connection {} abandoned, closing", link);
                if let Err(e) = manager.disconnect(&device).await {
                    warn!("Disconnect of abandoned {} reported an error: {}", link, e);
                }
                if close.report {
                    let _ = events.send(TransportEvent::LinkLost {
                        link,
                        reason: "local disconnect".to_string(),
                    });
                }
            }
        }
    }

    /// Closes `link` whether it is pending or open. Later connects to the
    /// same address wait until it is down.
    fn close(&self, link: LinkId, report: bool) {
        let mut links = lock(&self.links);
        let Some(state) = links.get_mut(&link) else {
            debug!("No link {} to close", link);
            return;
        };
        state.cancel.cancel();

        if !state.established {
            match state.pending_close.as_mut() {
                Some(close) => close.report |= report,
                None => {
                    info!("Abandoning pending {} to {}", link, state.address);
                    let done = CancellationToken::new();
                    lock(&self.closing).insert(state.address.clone(), done.clone());
                    state.pending_close = Some(PendingClose { report, done });
                }
            }
            return;
        }

        let Some(state) = links.remove(&link) else {
            return;
        };
        drop(links);
        let done = CancellationToken::new();
        lock(&self.closing).insert(state.address.clone(), done.clone());

        let manager = self.connection_manager.clone();
        let events = self.events.clone();
        self.spawn(async move {
            let _done = done.drop_guard();
            if let Err(e) = manager.disconnect(&state.device).await {
                warn!("Disconnect of {} reported an error: {}", link, e);
            }
            if report {
                let _ = events.send(TransportEvent::LinkLost {
                    link,
                    reason: "local disconnect".to_string(),
                });
            }
        });
    }
}

impl BleTransport for BluestTransport {
    fn start_scan(&self) {
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.scan_cancel).replace(cancel.clone()) {
            previous.cancel();
        }
        lock(&self.devices).clear();

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let events = self.events.clone();
        self.spawn(Self::scan_task(adapter, devices, events, cancel));
        info!("Device scan task started.");
    }

    fn stop_scan(&self) {
        if let Some(cancel) = lock(&self.scan_cancel).take() {
            info!("Stopping Bluetooth scan.");
            cancel.cancel();
        }
    }

    fn connect(&self, link: LinkId, address: &str) {
        let device = lock(&self.devices).get(address).cloned();
        let Some(device) = device else {
            self.emit(TransportEvent::LinkFailed {
                link,
                reason: format!("Device not found with address: {}", address),
            });
            return;
        };

        let state = LinkState::new(address.to_string(), device.clone());
        let cancel = state.cancel.clone();
        lock(&self.links).insert(link, state);
        let previous_close = lock(&self.closing).get(address).cloned();

        info!("Connecting {} to {}", link, address);
        self.spawn(Self::connect_task(
            self.connection_manager.clone(),
            self.links.clone(),
            self.events.clone(),
            link,
            device,
            previous_close,
            cancel,
        ));
    }

    fn disconnect(&self, link: LinkId) {
        self.close(link, true);
    }

    fn release(&self, link: LinkId) {
        self.close(link, false);
    }

    fn discover_services(&self, link: LinkId) {
        let Some(device) = self.link_device(link) else {
            self.emit(TransportEvent::DiscoveryFailed {
                link,
                reason: "no open link".to_string(),
            });
            return;
        };

        let manager = self.connection_manager.clone();
        let links = self.links.clone();
        let events = self.events.clone();
        self.spawn(async move {
            info!("Discovering services on {}...", link);
            match manager.discover(&device).await {
                Ok((services, characteristics)) => {
                    if let Some(state) = lock(&links).get_mut(&link) {
                        state.characteristics = characteristics;
                    }
                    let _ = events.send(TransportEvent::ServicesDiscovered { link, services });
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        link,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    fn write(&self, link: LinkId, service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        let target = self.link_characteristic(link, service, characteristic);
        let events = self.events.clone();
        self.spawn(async move {
            let result = match target {
                Some(target) => target.write(&value).await.map_err(|e| e.to_string()),
                None => Err(format!("characteristic {} not resolved", characteristic)),
            };
            let _ = events.send(TransportEvent::WriteCompleted {
                link,
                characteristic,
                result,
            });
        });
    }

    fn read(&self, link: LinkId, service: Uuid, characteristic: Uuid) {
        let target = self.link_characteristic(link, service, characteristic);
        let events = self.events.clone();
        self.spawn(async move {
            let result = match target {
                Some(target) => target.read().await.map_err(|e| e.to_string()),
                None => Err(format!("characteristic {} not resolved", characteristic)),
            };
            let _ = events.send(TransportEvent::ReadCompleted {
                link,
                characteristic,
                result,
            });
        });
    }

    fn set_notify(&self, link: LinkId, service: Uuid, characteristic: Uuid, enabled: bool) {
        let mut links = lock(&self.links);
        let Some(state) = links.get_mut(&link) else {
            debug!("No open {} for notifications", link);
            return;
        };

        if let Some(previous) = state.notifications.remove(&characteristic) {
            previous.cancel();
        }
        if !enabled {
            return;
        }

        let Some(target) = state.characteristics.get(&(service, characteristic)).cloned() else {
            warn!("Characteristic {} not resolved, cannot subscribe", characteristic);
            return;
        };
        let cancel = state.cancel.child_token();
        state.notifications.insert(characteristic, cancel.clone());
        drop(links);

        let handler = NotificationHandler::new(link, self.events.clone());
        self.spawn(handler.process_notifications(target, cancel));
    }
}

impl Drop for BluestTransport {
    fn drop(&mut self) {
        self.stop_scan();
        let open: Vec<LinkId> = lock(&self.links).keys().copied().collect();
        for link in open {
            self.close(link, false);
        }
    }
}

/// Maps a bluest error onto a scan failure code
fn scan_failure_code(error: &bluest::Error) -> i32 {
    match error.kind() {
        ErrorKind::AdapterUnavailable => SCAN_FAILED_ADAPTER_UNAVAILABLE,
        ErrorKind::NotAuthorized => SCAN_FAILED_NOT_AUTHORIZED,
        ErrorKind::NotSupported => SCAN_FAILED_FEATURE_UNSUPPORTED,
        _ => SCAN_FAILED_INTERNAL_ERROR,
    }
}

/// Pulls a MAC address out of a platform device id
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    static MAC_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = MAC_RE
        .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok())
        .as_ref()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace(['-', '_'], ":").to_uppercase())
}
