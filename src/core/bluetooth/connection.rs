//! Bluetooth link handling for the bluest backend
//! Connects, resolves services, watches link liveness and disconnects.

use std::collections::HashMap;
use std::time::Duration;

use bluest::{Adapter, Characteristic, Device};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::transport::{LinkId, TransportEvent, TransportEventSender};
use crate::core::bluetooth::types::{CharacteristicInfo, CharacteristicProperties, ServiceInfo};

/// Characteristics of a connected device keyed by (service, characteristic)
pub type CharacteristicMap = HashMap<(Uuid, Uuid), Characteristic>;

/// A close requested before the link came up; the connect task carries it out
pub struct PendingClose {
    /// Report `LinkLost` once closed
    pub report: bool,
    /// Fired when the link is fully closed
    pub done: CancellationToken,
}

/// Handles held for one link, from the connect request until it is closed
pub struct LinkState {
    pub address: String,
    /// The device handle, used for checking connection status or disconnecting.
    pub device: Device,
    /// Set once `connect_device` succeeded
    pub established: bool,
    pub pending_close: Option<PendingClose>,
    /// Characteristics resolved by the last discovery
    pub characteristics: CharacteristicMap,
    /// Cancels the link watcher and every notification stream of this link
    pub cancel: CancellationToken,
    /// Per-characteristic notification streams
    pub notifications: HashMap<Uuid, CancellationToken>,
}

impl LinkState {
    pub fn new(address: String, device: Device) -> Self {
        Self {
            address,
            device,
            established: false,
            pending_close: None,
            characteristics: HashMap::new(),
            cancel: CancellationToken::new(),
            notifications: HashMap::new(),
        }
    }
}

/// Connection manager for the peripheral
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Adapter,
    poll_interval: Duration,
}

impl ConnectionManager {
    pub fn new(adapter: Adapter, poll_interval: Duration) -> Self {
        Self {
            adapter,
            poll_interval,
        }
    }

    /// Opens the link unless the platform already holds one
    pub async fn connect(&self, device: &Device) -> Result<(), bluest::Error> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", device.id(), name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            self.adapter.connect_device(device).await?;
        } else {
            info!("Device {} already connected at the platform level", device.id());
        }
        Ok(())
    }

    /// Resolves every service and characteristic of the device
    pub async fn discover(
        &self,
        device: &Device,
    ) -> Result<(Vec<ServiceInfo>, CharacteristicMap), bluest::Error> {
        let mut services = Vec::new();
        let mut characteristics = HashMap::new();

        for service in device.services().await? {
            let service_uuid = service.uuid();
            debug!("Available service: {}", service_uuid);
            let mut infos = Vec::new();

            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid();
                let properties = match characteristic.properties().await {
                    Ok(props) => CharacteristicProperties {
                        read: props.read,
                        write: props.write,
                        write_without_response: props.write_without_response,
                        notify: props.notify || props.indicate,
                    },
                    Err(e) => {
                        warn!("Could not read properties of {}: {}", uuid, e);
                        CharacteristicProperties::default()
                    }
                };
                debug!("  characteristic {} {:?}", uuid, properties);
                infos.push(CharacteristicInfo { uuid, properties });
                characteristics.insert((service_uuid, uuid), characteristic);
            }

            services.push(ServiceInfo {
                uuid: service_uuid,
                characteristics: infos,
            });
        }

        Ok((services, characteristics))
    }

    /// Disconnect from the device
    pub async fn disconnect(&self, device: &Device) -> Result<(), bluest::Error> {
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter.disconnect_device(device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }

    /// Polls the link until it drops or `cancel` fires. A drop is reported
    /// as `LinkLost`; returns whether that happened.
    pub async fn watch_link(
        &self,
        device: Device,
        link: LinkId,
        events: TransportEventSender,
        cancel: CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {
                    if !device.is_connected().await {
                        warn!("Device {} lost connection ({})", device.id(), link);
                        let _ = events.send(TransportEvent::LinkLost {
                            link,
                            reason: "connection lost".to_string(),
                        });
                        return true;
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Link watcher for {} stopped", link);
                    return false;
                }
            }
        }
    }
}
