use std::sync::Arc;
use std::time::Duration;

use ble_serial_link::config::AppConfig;
use ble_serial_link::core::bluetooth::{
    BleError, BleEvent, BluetoothManager, CharacteristicInfo, CharacteristicProperties,
    ConnectOutcome, ConnectionState, DeviceIdentity, EventSubscription, FailureReason,
    FakeTransport, LinkId, ScanReport, ServiceInfo, TransportCall, TransportEvent,
    UUID_SERIAL_RX_TX, UUID_SERIAL_SERVICE, transport_channel,
};
use uuid::Uuid;

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

fn start(config: AppConfig) -> (BluetoothManager, Arc<FakeTransport>, EventSubscription) {
    let (events_tx, events_rx) = transport_channel();
    let fake = Arc::new(FakeTransport::new(events_tx));
    let manager = BluetoothManager::spawn(fake.clone(), events_rx, config);
    let events = manager.subscribe();
    (manager, fake, events)
}

fn serial_services() -> Vec<ServiceInfo> {
    vec![
        ServiceInfo {
            uuid: Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb),
            characteristics: vec![],
        },
        ServiceInfo {
            uuid: UUID_SERIAL_SERVICE,
            characteristics: vec![CharacteristicInfo {
                uuid: UUID_SERIAL_RX_TX,
                properties: CharacteristicProperties::serial(),
            }],
        },
    ]
}

fn advert(name: &str, address: &str) -> TransportEvent {
    TransportEvent::Advertisement(ScanReport::new(Some(name.to_string()), address, Some(-60)))
}

/// Waits for the first event matching `pred`, skipping the rest
async fn expect_event(
    events: &mut EventSubscription,
    pred: impl Fn(&BleEvent) -> bool,
) -> BleEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// The link the manager opened most recently
fn current_link(fake: &FakeTransport) -> LinkId {
    fake.last_link().expect("no link was requested")
}

/// Drives the manager to `Ready` on `ADDRESS` over a new link
async fn connect_ready(
    manager: &BluetoothManager,
    fake: &FakeTransport,
    events: &mut EventSubscription,
) -> (DeviceIdentity, LinkId) {
    let identity = DeviceIdentity::new("SSONG", ADDRESS);
    let outcome = manager.connect(identity.clone()).await.unwrap();
    assert_eq!(outcome, ConnectOutcome::Started);

    let link = current_link(fake);
    fake.inject(TransportEvent::LinkEstablished { link });
    fake.inject(TransportEvent::ServicesDiscovered {
        link,
        services: serial_services(),
    });
    expect_event(events, |e| matches!(e, BleEvent::ServicesReady)).await;
    (identity, link)
}

fn connect_calls(fake: &FakeTransport) -> usize {
    fake.calls()
        .into_iter()
        .filter(|call| matches!(call, TransportCall::Connect { .. }))
        .count()
}

#[tokio::test]
async fn scan_connect_send_and_receive() {
    let (manager, fake, mut events) = start(AppConfig::default());

    manager
        .start_scan("SSONG", Duration::from_secs(100))
        .await
        .unwrap();
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Scanning
    );

    fake.inject(advert("Mi Band", "C8:0F:10:00:00:01"));
    fake.inject(advert("SSONG", ADDRESS));
    let found = expect_event(&mut events, |e| matches!(e, BleEvent::DeviceFound(_))).await;
    let BleEvent::DeviceFound(identity) = found else {
        unreachable!()
    };
    assert_eq!(identity, DeviceIdentity::new("SSONG", ADDRESS));
    assert!(fake.calls().contains(&TransportCall::StopScan));

    manager.connect(identity.clone()).await.unwrap();
    let link = current_link(&fake);
    fake.inject(TransportEvent::LinkEstablished { link });
    let connected = expect_event(&mut events, |e| matches!(e, BleEvent::Connected(_))).await;
    assert_eq!(connected, BleEvent::Connected(identity));

    fake.inject(TransportEvent::ServicesDiscovered {
        link,
        services: serial_services(),
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::ServicesReady)).await;
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Ready
    );

    manager.send(vec![0x4B, 0x01, 0x4E]).await.unwrap();
    assert_eq!(fake.writes(), vec![vec![0x4B, 0x01, 0x4E]]);
    assert!(fake.calls().contains(&TransportCall::SetNotify {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        enabled: true,
    }));

    fake.inject(TransportEvent::Notification {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0x4B, 0x01, 0x4E],
    });
    let data = expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;
    let BleEvent::DataReceived(frame) = data else {
        unreachable!()
    };
    assert_eq!(frame.as_bytes(), &[0x4B, 0x01, 0x4E]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scan_window_closes_without_a_match() {
    let (manager, fake, mut events) = start(AppConfig::default());

    manager
        .start_scan("SSONG", Duration::from_millis(100))
        .await
        .unwrap();
    fake.inject(advert("HMSoft", "C8:0F:10:00:00:02"));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Idle
    );
    assert_eq!(
        fake.calls(),
        vec![TransportCall::StartScan, TransportCall::StopScan]
    );
    assert!(
        events
            .drain()
            .iter()
            .all(|e| !matches!(e, BleEvent::DeviceFound(_)))
    );

    // a new window may be opened afterwards
    manager
        .start_scan("SSONG", Duration::from_millis(100))
        .await
        .unwrap();
}

#[tokio::test]
async fn second_scan_is_rejected() {
    let (manager, _fake, _events) = start(AppConfig::default());

    manager
        .start_scan("SSONG", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(
        manager.start_scan("SSONG", Duration::from_secs(10)).await,
        Err(BleError::AlreadyScanning)
    );

    manager.stop_scan().await.unwrap();
    manager.stop_scan().await.unwrap();
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Idle
    );
}

#[tokio::test]
async fn scan_failure_is_reported() {
    let (manager, fake, mut events) = start(AppConfig::default());

    manager
        .start_scan("SSONG", Duration::from_secs(10))
        .await
        .unwrap();
    fake.inject(TransportEvent::ScanFailed { code: 5 });

    let failed = expect_event(&mut events, |e| matches!(e, BleEvent::ScanFailed(_))).await;
    assert_eq!(failed, BleEvent::ScanFailed(5));
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Idle
    );
}

#[tokio::test]
async fn connect_to_the_ready_device_is_idempotent() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (identity, _) = connect_ready(&manager, &fake, &mut events).await;

    let outcome = manager.connect(identity).await.unwrap();
    assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
    assert_eq!(connect_calls(&fake), 1);
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Ready
    );
}

#[tokio::test]
async fn connect_during_an_attempt_is_refused() {
    let (manager, _fake, _events) = start(AppConfig::default());

    manager
        .connect(DeviceIdentity::new("SSONG", ADDRESS))
        .await
        .unwrap();
    let second = manager
        .connect(DeviceIdentity::new("SSONG", "00:15:83:00:7A:22"))
        .await;
    assert_eq!(
        second,
        Err(BleError::InvalidState(ConnectionState::Connecting))
    );
}

#[tokio::test]
async fn send_requires_a_ready_link() {
    let (manager, _fake, _events) = start(AppConfig::default());
    assert_eq!(manager.send(vec![0x01]).await, Err(BleError::NotReady));
    assert_eq!(manager.read().await, Err(BleError::NotReady));
}

#[tokio::test]
async fn overlapping_sends_are_rejected_until_completion() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, link) = connect_ready(&manager, &fake, &mut events).await;

    manager.send(vec![0x01]).await.unwrap();
    assert_eq!(manager.send(vec![0x02]).await, Err(BleError::SendRejected));

    fake.inject(TransportEvent::WriteCompleted {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        result: Ok(()),
    });
    // events are handled in order, so this notification marks the write as consumed
    fake.inject(TransportEvent::Notification {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0xAA],
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;

    manager.send(vec![0x03]).await.unwrap();
    assert_eq!(fake.writes(), vec![vec![0x01], vec![0x03]]);
}

#[tokio::test]
async fn read_value_arrives_as_data() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, link) = connect_ready(&manager, &fake, &mut events).await;

    manager.read().await.unwrap();
    assert!(fake.calls().contains(&TransportCall::Read {
        link,
        characteristic: UUID_SERIAL_RX_TX,
    }));

    fake.inject(TransportEvent::ReadCompleted {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        result: Ok(vec![0x10, 0x20]),
    });
    let data = expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;
    assert_eq!(data, BleEvent::DataReceived(vec![0x10, 0x20].into()));
}

#[tokio::test]
async fn missing_serial_characteristic_fails_the_attempt() {
    let (manager, fake, mut events) = start(AppConfig::default());

    manager
        .connect(DeviceIdentity::new("SSONG", ADDRESS))
        .await
        .unwrap();
    let link = current_link(&fake);
    fake.inject(TransportEvent::LinkEstablished { link });
    fake.inject(TransportEvent::ServicesDiscovered {
        link,
        services: vec![ServiceInfo {
            uuid: Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
            characteristics: vec![],
        }],
    });

    let failed = expect_event(&mut events, |e| {
        matches!(e, BleEvent::StateChanged(ConnectionState::Failed(_)))
    })
    .await;
    assert_eq!(
        failed,
        BleEvent::StateChanged(ConnectionState::Failed(
            FailureReason::MissingCharacteristic
        ))
    );
    assert!(fake.calls().contains(&TransportCall::Release(link)));
    assert!(!fake.calls().contains(&TransportCall::Disconnect(link)));
    assert_eq!(manager.send(vec![0x01]).await, Err(BleError::NotReady));
}

#[tokio::test]
async fn auto_connect_follows_the_first_match() {
    let mut config = AppConfig::default();
    config.scan.auto_connect = true;
    let (manager, fake, mut events) = start(config);

    manager
        .start_scan("SSONG", Duration::from_secs(10))
        .await
        .unwrap();
    fake.inject(advert("SSONG", ADDRESS));

    expect_event(&mut events, |e| {
        matches!(e, BleEvent::StateChanged(ConnectionState::Connecting))
    })
    .await;
    assert!(fake.calls().contains(&TransportCall::Connect {
        link: current_link(&fake),
        address: ADDRESS.to_string(),
    }));
}

#[tokio::test]
async fn disconnect_waits_for_link_loss() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, link) = connect_ready(&manager, &fake, &mut events).await;

    manager.disconnect().await.unwrap();
    assert!(fake.calls().contains(&TransportCall::Disconnect(link)));
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Ready
    );

    fake.inject(TransportEvent::LinkLost {
        link,
        reason: "local disconnect".to_string(),
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::Disconnected)).await;

    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(manager.send(vec![0x01]).await, Err(BleError::NotReady));
}

#[tokio::test]
async fn reconnect_targets_the_last_device() {
    let (manager, fake, mut events) = start(AppConfig::default());
    assert_eq!(manager.reconnect().await, Err(BleError::NoKnownDevice));

    let (_, first) = connect_ready(&manager, &fake, &mut events).await;
    fake.inject(TransportEvent::LinkLost {
        link: first,
        reason: "remote closed".to_string(),
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::Disconnected)).await;

    let outcome = manager.reconnect().await.unwrap();
    assert_eq!(outcome, ConnectOutcome::Started);
    assert_eq!(
        fake.links().len(),
        2,
        "reconnect opens a fresh link to the same address"
    );
    assert_ne!(current_link(&fake), first);
    assert!(fake.calls().contains(&TransportCall::Connect {
        link: current_link(&fake),
        address: ADDRESS.to_string(),
    }));
}

#[tokio::test]
async fn stale_notifications_are_dropped() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, link) = connect_ready(&manager, &fake, &mut events).await;

    fake.inject(TransportEvent::Notification {
        link: LinkId::new(link.get() + 7),
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0xEE],
    });
    fake.inject(TransportEvent::Notification {
        link,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0x01],
    });

    let data = expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;
    assert_eq!(data, BleEvent::DataReceived(vec![0x01].into()));
    manager.shutdown().await;
}

/// Brings the link down remotely and reconnects to the same address
async fn reconnect_ready(
    manager: &BluetoothManager,
    fake: &FakeTransport,
    events: &mut EventSubscription,
    previous: LinkId,
) -> LinkId {
    fake.inject(TransportEvent::LinkLost {
        link: previous,
        reason: "remote closed".to_string(),
    });
    expect_event(events, |e| matches!(e, BleEvent::Disconnected)).await;

    let (_, link) = connect_ready(manager, fake, events).await;
    assert_ne!(link, previous);
    link
}

#[tokio::test]
async fn late_link_loss_does_not_end_a_retry_on_the_same_address() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let identity = DeviceIdentity::new("SSONG", ADDRESS);

    manager.connect(identity.clone()).await.unwrap();
    let first = current_link(&fake);
    fake.inject(TransportEvent::LinkEstablished { link: first });
    fake.inject(TransportEvent::DiscoveryFailed {
        link: first,
        reason: "gatt error 133".to_string(),
    });
    expect_event(&mut events, |e| {
        matches!(e, BleEvent::StateChanged(ConnectionState::Failed(_)))
    })
    .await;
    assert!(fake.calls().contains(&TransportCall::Release(first)));

    manager.connect(identity.clone()).await.unwrap();
    let second = current_link(&fake);
    assert_ne!(second, first);

    // the closed link reports late, after the retry started
    fake.inject(TransportEvent::LinkLost {
        link: first,
        reason: "connection lost".to_string(),
    });
    fake.inject(TransportEvent::LinkEstablished { link: second });
    let connected = expect_event(&mut events, |e| {
        matches!(e, BleEvent::Connected(_) | BleEvent::Disconnected)
    })
    .await;
    assert_eq!(connected, BleEvent::Connected(identity));
    assert_eq!(
        manager.connection_state().await.unwrap(),
        ConnectionState::Discovering
    );

    fake.inject(TransportEvent::ServicesDiscovered {
        link: second,
        services: serial_services(),
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::ServicesReady)).await;
    manager.send(vec![0x01]).await.unwrap();
}

#[tokio::test]
async fn write_completion_from_the_previous_link_is_ignored() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, first) = connect_ready(&manager, &fake, &mut events).await;
    manager.send(vec![0x01]).await.unwrap();

    let second = reconnect_ready(&manager, &fake, &mut events, first).await;
    manager.send(vec![0x02]).await.unwrap();

    fake.inject(TransportEvent::WriteCompleted {
        link: first,
        characteristic: UUID_SERIAL_RX_TX,
        result: Ok(()),
    });
    fake.inject(TransportEvent::Notification {
        link: second,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0xAA],
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;

    assert_eq!(manager.send(vec![0x03]).await, Err(BleError::SendRejected));
    assert_eq!(fake.writes(), vec![vec![0x01], vec![0x02]]);

    fake.inject(TransportEvent::WriteCompleted {
        link: second,
        characteristic: UUID_SERIAL_RX_TX,
        result: Ok(()),
    });
    fake.inject(TransportEvent::Notification {
        link: second,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0xAB],
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;
    manager.send(vec![0x03]).await.unwrap();
}

#[tokio::test]
async fn notifications_from_the_previous_link_are_dropped() {
    let (manager, fake, mut events) = start(AppConfig::default());
    let (_, first) = connect_ready(&manager, &fake, &mut events).await;
    let second = reconnect_ready(&manager, &fake, &mut events, first).await;

    fake.inject(TransportEvent::Notification {
        link: first,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0xEE],
    });
    fake.inject(TransportEvent::Notification {
        link: second,
        characteristic: UUID_SERIAL_RX_TX,
        value: vec![0x01],
    });

    let data = expect_event(&mut events, |e| matches!(e, BleEvent::DataReceived(_))).await;
    assert_eq!(data, BleEvent::DataReceived(vec![0x01].into()));
    manager.shutdown().await;
}

#[tokio::test]
async fn disconnect_while_connecting_ends_the_attempt() {
    let (manager, fake, mut events) = start(AppConfig::default());

    manager
        .connect(DeviceIdentity::new("SSONG", ADDRESS))
        .await
        .unwrap();
    let link = current_link(&fake);
    manager.disconnect().await.unwrap();
    assert!(fake.calls().contains(&TransportCall::Disconnect(link)));

    fake.inject(TransportEvent::LinkLost {
        link,
        reason: "local disconnect".to_string(),
    });
    expect_event(&mut events, |e| matches!(e, BleEvent::Disconnected)).await;
    assert_eq!(manager.send(vec![0x01]).await, Err(BleError::NotReady));
}
