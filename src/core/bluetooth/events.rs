//! Event bus
//! Fans out lifecycle and data events from the link layer to any number of
//! subscribers. Delivery is in emission order; late subscribers see nothing
//! that was emitted before they subscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::bluetooth::types::{ConnectionState, DeviceIdentity, Frame};

/// Events published by the link layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BleEvent {
    /// The scanner found the target peripheral
    DeviceFound(DeviceIdentity),
    /// The radio refused or aborted the scan
    ScanFailed(i32),
    /// The session moved to a new state
    StateChanged(ConnectionState),
    /// The physical link to the peripheral is up
    Connected(DeviceIdentity),
    /// The link is gone; all characteristic handles are cleared
    Disconnected,
    /// Discovery located the serial characteristic
    ServicesReady,
    /// One inbound frame from the peripheral
    DataReceived(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<BleEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Clonable handle to the process-wide event fan-out
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Receiving side of a subscription
pub struct EventSubscription {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<BleEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<BleEvent> {
        let event = self.rx.recv().await?;
        self.active.load(Ordering::Acquire).then_some(event)
    }

    /// Returns the next queued event without waiting
    pub fn try_recv(&mut self) -> Option<BleEvent> {
        let event = self.rx.try_recv().ok()?;
        self.active.load(Ordering::Acquire).then_some(event)
    }

    /// Drains every event queued so far
    pub fn drain(&mut self) -> Vec<BleEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> EventSubscription {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        inner.subscribers.push(Subscriber {
            id,
            active: active.clone(),
            tx,
        });
        debug!("Event subscriber {:?} registered", id);

        EventSubscription { id, active, rx }
    }

    /// Removes a subscriber. Events still queued for it are discarded.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| {
            if subscriber.id == id {
                subscriber.active.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        debug!("Event subscriber {:?} removed", id);
    }

    /// Runs `callback` for every event on a dedicated task until `off_event`.
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(BleEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let id = subscription.id();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                callback(event);
            }
        });
        id
    }

    pub fn off_event(&self, id: SubscriptionId) {
        self.unsubscribe(id);
    }

    pub fn emit(&self, event: BleEvent) {
        let mut inner = self.lock();
        debug!("Emitting {:?} to {} subscriber(s)", event, inner.subscribers.len());
        inner
            .subscribers
            .retain(|subscriber| subscriber.tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
