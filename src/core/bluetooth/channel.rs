//! Data channel over the serial characteristic pair
//! Maps "send frame" onto TX writes and RX notifications (and reads) onto
//! `DataReceived` events. No fragmentation or reassembly is done here.

use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, EventBus};
use crate::core::bluetooth::session::GattSession;
use crate::core::bluetooth::types::{CharacteristicHandle, ConnectionState, Frame};

pub struct DataChannel {
    bus: EventBus,
    tx: Option<CharacteristicHandle>,
    rx: Option<CharacteristicHandle>,
}

impl DataChannel {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            tx: None,
            rx: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.tx.is_some() && self.rx.is_some()
    }

    /// Takes the session's TX/RX handles and subscribes to RX notifications
    pub fn arm(&mut self, session: &mut GattSession) -> Result<(), BleError> {
        let tx = session.tx_handle().cloned().ok_or(BleError::NotReady)?;
        let rx = session.rx_handle().cloned().ok_or(BleError::NotReady)?;

        if !tx.can_write() {
            warn!("TX characteristic {} does not advertise write", tx.characteristic_uuid);
        }
        if rx.can_notify() {
            session.set_notifications(&rx, true)?;
        } else {
            info!("RX characteristic {} does not advertise notify", rx.characteristic_uuid);
        }
        info!("Data channel armed on {}", tx.characteristic_uuid);
        self.tx = Some(tx);
        self.rx = Some(rx);
        Ok(())
    }

    pub fn disarm(&mut self) {
        if self.is_armed() {
            info!("Data channel disarmed");
        }
        self.tx = None;
        self.rx = None;
    }

    /// Hands one frame to the session. Rejections are reported, not retried.
    pub fn send(&self, session: &mut GattSession, frame: Frame) -> Result<(), BleError> {
        let tx = match (&self.tx, session.state()) {
            (Some(tx), ConnectionState::Ready) => tx,
            _ => return Err(BleError::NotReady),
        };
        session
            .write_characteristic(tx, frame)
            .map_err(|e| match e {
                BleError::WriteInProgress => BleError::SendRejected,
                other => other,
            })
    }

    /// Requests the current RX value; it arrives as `DataReceived`
    pub fn request_read(&self, session: &mut GattSession) -> Result<(), BleError> {
        let rx = self.rx.as_ref().ok_or(BleError::NotReady)?;
        session.read_characteristic(rx)
    }

    pub fn set_notifications(&self, session: &mut GattSession, enabled: bool) -> Result<(), BleError> {
        let rx = self.rx.as_ref().ok_or(BleError::NotReady)?;
        session.set_notifications(rx, enabled)
    }

    /// One inbound payload on `characteristic`. Emits exactly one frame if it
    /// is the RX characteristic; returns whether it was consumed.
    pub fn on_inbound(&self, characteristic: Uuid, value: &[u8]) -> bool {
        match &self.rx {
            Some(rx) if rx.characteristic_uuid == characteristic => {
                let frame = Frame::from(value);
                debug!("Received frame: [{}]", frame);
                self.bus.emit(BleEvent::DataReceived(frame));
                true
            }
            _ => {
                debug!("Dropping {} byte(s) from {}", value.len(), characteristic);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::profile_config::ProfileConfig;
    use crate::core::bluetooth::constants::{UUID_SERIAL_RX_TX, UUID_SERIAL_SERVICE};
    use crate::core::bluetooth::fake::{FakeTransport, TransportCall};
    use crate::core::bluetooth::transport::{TransportEvent, transport_channel};
    use crate::core::bluetooth::types::{
        CharacteristicInfo, CharacteristicProperties, DeviceIdentity, ServiceInfo,
    };

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn ready() -> (GattSession, DataChannel, Arc<FakeTransport>, EventBus) {
        let (events, _rx) = transport_channel();
        let transport = Arc::new(FakeTransport::new(events));
        let bus = EventBus::new();
        let mut session = GattSession::new(transport.clone(), bus.clone(), ProfileConfig::default());
        session.connect(DeviceIdentity::new("SSONG", ADDRESS)).unwrap();
        let link = session.link_id().unwrap();
        session.handle_event(&TransportEvent::LinkEstablished { link });
        session.handle_event(&TransportEvent::ServicesDiscovered {
            link,
            services: vec![ServiceInfo {
                uuid: UUID_SERIAL_SERVICE,
                characteristics: vec![CharacteristicInfo {
                    uuid: UUID_SERIAL_RX_TX,
                    properties: CharacteristicProperties::serial(),
                }],
            }],
        });
        let mut channel = DataChannel::new(bus.clone());
        channel.arm(&mut session).unwrap();
        (session, channel, transport, bus)
    }

    #[test]
    fn arming_enables_rx_notifications() {
        let (session, channel, transport, _bus) = ready();
        assert!(channel.is_armed());
        assert!(session.is_notifying(session.rx_handle().unwrap()));
        assert!(transport.calls().contains(&TransportCall::SetNotify {
            link: session.link_id().unwrap(),
            characteristic: UUID_SERIAL_RX_TX,
            enabled: true,
        }));
    }

    #[test]
    fn send_maps_pending_write_to_send_rejected() {
        let (mut session, channel, transport, _bus) = ready();
        channel.send(&mut session, Frame::new(vec![0x4B, 0x01, 0x4E])).unwrap();
        assert_eq!(
            channel.send(&mut session, Frame::new(vec![0x01])),
            Err(BleError::SendRejected)
        );

        session.handle_event(&TransportEvent::WriteCompleted {
            link: session.link_id().unwrap(),
            characteristic: UUID_SERIAL_RX_TX,
            result: Ok(()),
        });
        channel.send(&mut session, Frame::new(vec![0x01])).unwrap();
        assert_eq!(transport.writes(), vec![vec![0x4B, 0x01, 0x4E], vec![0x01]]);
    }

    #[test]
    fn send_on_unarmed_channel_is_not_ready() {
        let (events, _rx) = transport_channel();
        let transport = Arc::new(FakeTransport::new(events));
        let bus = EventBus::new();
        let mut session = GattSession::new(transport.clone(), bus.clone(), ProfileConfig::default());
        let channel = DataChannel::new(bus);

        assert_eq!(
            channel.send(&mut session, Frame::new(vec![1, 2])),
            Err(BleError::NotReady)
        );
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn each_notification_becomes_one_frame() {
        let (_session, channel, _transport, bus) = ready();
        let mut sub = bus.subscribe();

        assert!(channel.on_inbound(UUID_SERIAL_RX_TX, &[0x10, 0x20, 0x30]));
        assert!(channel.on_inbound(UUID_SERIAL_RX_TX, &[0x40]));
        assert!(!channel.on_inbound(Uuid::from_u128(0x2a19), &[0x64]));

        assert_eq!(
            sub.drain(),
            vec![
                BleEvent::DataReceived(Frame::new(vec![0x10, 0x20, 0x30])),
                BleEvent::DataReceived(Frame::new(vec![0x40])),
            ]
        );
    }

    #[test]
    fn disarmed_channel_drops_inbound_data() {
        let (_session, mut channel, _transport, bus) = ready();
        let mut sub = bus.subscribe();
        channel.disarm();
        assert!(!channel.on_inbound(UUID_SERIAL_RX_TX, &[0x01]));
        assert!(sub.drain().is_empty());
    }
}
