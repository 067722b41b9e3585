//! Bluetooth manager
//! This module provides the main interface for link operations. A single
//! task owns the scanner, the GATT session and the data channel; every
//! consumer call and every transport callback is serialized onto it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::Adapter;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::core::bluetooth::bluest_transport::BluestTransport;
use crate::core::bluetooth::channel::DataChannel;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, EventBus, EventSubscription, SubscriptionId};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::session::{ConnectOutcome, GattSession};
use crate::core::bluetooth::transport::{
    BleTransport, TransportEvent, TransportEventReceiver, transport_channel,
};
use crate::core::bluetooth::types::{ConnectionState, DeviceIdentity, Frame};

type Reply<T> = oneshot::Sender<Result<T, BleError>>;

enum ManagerCommand {
    StartScan {
        target_name: String,
        timeout: Duration,
        reply: Reply<()>,
    },
    StopScan {
        reply: Reply<()>,
    },
    Connect {
        identity: DeviceIdentity,
        reply: Reply<ConnectOutcome>,
    },
    Reconnect {
        reply: Reply<ConnectOutcome>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Send {
        frame: Frame,
        reply: Reply<()>,
    },
    Read {
        reply: Reply<()>,
    },
    SetNotifications {
        enabled: bool,
        reply: Reply<()>,
    },
    State {
        reply: Reply<ConnectionState>,
    },
}

/// Clonable handle to the manager task
#[derive(Clone)]
pub struct BluetoothManager {
    tx: mpsc::Sender<ManagerCommand>,
    bus: EventBus,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl BluetoothManager {
    /// Acquires the default adapter and starts a manager on top of bluest
    pub async fn with_bluest(config: AppConfig) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let (events_tx, events_rx) = transport_channel();
        let transport = BluestTransport::new(
            adapter,
            events_tx,
            config.session.link_poll_interval(),
        )?;
        Ok(Self::spawn(Arc::new(transport), events_rx, config))
    }

    /// Starts the manager task over any transport. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        transport: Arc<dyn BleTransport>,
        transport_events: TransportEventReceiver,
        config: AppConfig,
    ) -> Self {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel(config.session.command_buffer.max(1));
        let core = ManagerCore::new(transport, bus.clone(), config);
        let task = tokio::spawn(core.run(rx, transport_events));
        info!("Bluetooth manager task started.");

        Self {
            tx,
            bus,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ManagerCommand,
    ) -> Result<T, BleError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BleError::ManagerClosed)?;
        response.await.map_err(|_| BleError::ManagerClosed)?
    }

    /// Begins a time-bounded scan for `target_name`
    pub async fn start_scan(&self, target_name: &str, timeout: Duration) -> Result<(), BleError> {
        let target_name = target_name.to_string();
        self.request(|reply| ManagerCommand::StartScan {
            target_name,
            timeout,
            reply,
        })
        .await
    }

    pub async fn stop_scan(&self) -> Result<(), BleError> {
        self.request(|reply| ManagerCommand::StopScan { reply }).await
    }

    /// Starts a connection attempt; progress is reported on the event bus
    pub async fn connect(&self, identity: DeviceIdentity) -> Result<ConnectOutcome, BleError> {
        self.request(|reply| ManagerCommand::Connect { identity, reply })
            .await
    }

    /// Connects again to the last device found or connected
    pub async fn reconnect(&self) -> Result<ConnectOutcome, BleError> {
        self.request(|reply| ManagerCommand::Reconnect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<(), BleError> {
        self.request(|reply| ManagerCommand::Disconnect { reply }).await
    }

    /// Accepts or rejects one frame; write completion is not awaited
    pub async fn send(&self, bytes: impl Into<Frame>) -> Result<(), BleError> {
        let frame = bytes.into();
        self.request(|reply| ManagerCommand::Send { frame, reply }).await
    }

    /// Requests the RX value; it arrives as `DataReceived`
    pub async fn read(&self) -> Result<(), BleError> {
        self.request(|reply| ManagerCommand::Read { reply }).await
    }

    pub async fn set_notifications(&self, enabled: bool) -> Result<(), BleError> {
        self.request(|reply| ManagerCommand::SetNotifications { enabled, reply })
            .await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, BleError> {
        self.request(|reply| ManagerCommand::State { reply }).await
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    pub fn on_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(BleEvent) + Send + 'static,
    {
        self.bus.on_event(callback)
    }

    pub fn off_event(&self, id: SubscriptionId) {
        self.bus.off_event(id);
    }

    /// Stops the manager task; the scan is stopped and the link closed
    pub async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            info!("Shutting down Bluetooth manager.");
            task.abort();
            match task.await {
                Ok(()) => info!("Manager task finished."),
                Err(e) if e.is_cancelled() => info!("Manager task was cancelled successfully."),
                Err(e) => error!("Manager task finished with an unexpected join error: {:?}", e),
            }
        }
    }
}

/// State owned by the manager task
struct ManagerCore {
    config: AppConfig,
    scanner: BluetoothScanner,
    session: GattSession,
    channel: DataChannel,
    last_identity: Option<DeviceIdentity>,
}

impl ManagerCore {
    fn new(transport: Arc<dyn BleTransport>, bus: EventBus, config: AppConfig) -> Self {
        Self {
            scanner: BluetoothScanner::new(transport.clone(), bus.clone()),
            session: GattSession::new(transport, bus.clone(), config.profile.clone()),
            channel: DataChannel::new(bus),
            config,
            last_identity: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ManagerCommand>,
        mut transport_events: TransportEventReceiver,
    ) {
        loop {
            let deadline = self.scanner.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All manager handles dropped.");
                        break;
                    }
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                _ = wait_for(deadline) => self.scanner.on_timeout(),
            }
        }
        // scanner and session release the radio when dropped
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::StartScan {
                target_name,
                timeout,
                reply,
            } => {
                let filter = self.config.scan.filter_for(&target_name);
                let _ = reply.send(self.scanner.start(filter, timeout));
            }
            ManagerCommand::StopScan { reply } => {
                self.scanner.stop();
                let _ = reply.send(Ok(()));
            }
            ManagerCommand::Connect { identity, reply } => {
                let _ = reply.send(self.connect(identity));
            }
            ManagerCommand::Reconnect { reply } => {
                let result = match self.last_identity.clone() {
                    Some(identity) => self.connect(identity),
                    None => Err(BleError::NoKnownDevice),
                };
                let _ = reply.send(result);
            }
            ManagerCommand::Disconnect { reply } => {
                self.session.disconnect();
                let _ = reply.send(Ok(()));
            }
            ManagerCommand::Send { frame, reply } => {
                let _ = reply.send(self.channel.send(&mut self.session, frame));
            }
            ManagerCommand::Read { reply } => {
                let _ = reply.send(self.channel.request_read(&mut self.session));
            }
            ManagerCommand::SetNotifications { enabled, reply } => {
                let _ = reply.send(self.channel.set_notifications(&mut self.session, enabled));
            }
            ManagerCommand::State { reply } => {
                let _ = reply.send(Ok(self.connection_state()));
            }
        }
    }

    fn connect(&mut self, identity: DeviceIdentity) -> Result<ConnectOutcome, BleError> {
        let outcome = self.session.connect(identity.clone())?;
        if outcome == ConnectOutcome::Started {
            self.channel.disarm();
        }
        self.last_identity = Some(identity);
        Ok(outcome)
    }

    fn connection_state(&self) -> ConnectionState {
        let state = self.session.state();
        if self.scanner.is_scanning() && !state.is_attempt_active() {
            ConnectionState::Scanning
        } else {
            state.clone()
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match &event {
            TransportEvent::Advertisement(report) => {
                if let Some(identity) = self.scanner.on_report(report) {
                    self.last_identity = Some(identity.clone());
                    if self.config.scan.auto_connect {
                        info!("Auto-connecting to {}", identity);
                        if let Err(e) = self.connect(identity) {
                            warn!("Auto-connect refused: {}", e);
                        }
                    }
                }
                return;
            }
            TransportEvent::ScanFailed { code } => {
                self.scanner.on_scan_failed(*code);
                return;
            }
            _ => {}
        }

        let transition = self.session.handle_event(&event);
        match transition {
            Some(ConnectionState::Ready) => {
                if let Err(e) = self.channel.arm(&mut self.session) {
                    error!("Failed to arm data channel: {}", e);
                }
            }
            Some(_) => self.channel.disarm(),
            None => {}
        }

        if self.session.state() != &ConnectionState::Ready || event.link() != self.session.link_id() {
            return;
        }
        match event {
            TransportEvent::Notification {
                characteristic,
                value,
                ..
            } => {
                self.channel.on_inbound(characteristic, &value);
            }
            TransportEvent::ReadCompleted {
                characteristic,
                result,
                ..
            } => match result {
                Ok(value) => {
                    self.channel.on_inbound(characteristic, &value);
                }
                Err(e) => warn!("Read of {} failed: {}", characteristic, e),
            },
            other => debug!("Handled transport event {:?}", other),
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
