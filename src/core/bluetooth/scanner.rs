//! Scan session control
//! Owns one time-bounded scan at a time and reports the first matching
//! advertisement as `DeviceFound`.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::{BleEvent, EventBus};
use crate::core::bluetooth::filter::AdvertisementFilter;
use crate::core::bluetooth::transport::BleTransport;
use crate::core::bluetooth::types::{DeviceIdentity, ScanReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Scanning,
}

pub struct BluetoothScanner {
    transport: Arc<dyn BleTransport>,
    bus: EventBus,
    state: ScannerState,
    filter: Option<AdvertisementFilter>,
    deadline: Option<Instant>,
}

impl BluetoothScanner {
    pub fn new(transport: Arc<dyn BleTransport>, bus: EventBus) -> Self {
        Self {
            transport,
            bus,
            state: ScannerState::Idle,
            filter: None,
            deadline: None,
        }
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScannerState::Scanning
    }

    /// When the current scan window closes, if one is open
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn start(&mut self, filter: AdvertisementFilter, timeout: Duration) -> Result<(), BleError> {
        if self.is_scanning() {
            return Err(BleError::AlreadyScanning);
        }

        info!(
            "Starting scan for {:?} ({} ms window)",
            filter.target_name(),
            timeout.as_millis()
        );
        self.filter = Some(filter);
        self.deadline = Some(Instant::now() + timeout);
        self.state = ScannerState::Scanning;
        self.transport.start_scan();
        Ok(())
    }

    /// Cancels the pending timeout and halts the radio scan. No-op when idle.
    pub fn stop(&mut self) {
        if !self.is_scanning() {
            debug!("Scan stop requested while idle");
            return;
        }
        info!("Stopping Bluetooth scan.");
        self.halt();
    }

    fn halt(&mut self) {
        self.state = ScannerState::Idle;
        self.filter = None;
        self.deadline = None;
        self.transport.stop_scan();
    }

    /// Closes the window silently if its deadline has passed
    pub fn on_timeout(&mut self) {
        let expired = self
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        if self.is_scanning() && expired {
            info!("Scan window elapsed without a match");
            self.halt();
        }
    }

    /// Applies the filter; the first match stops the scan and emits `DeviceFound`.
    /// Reports arriving after that (stop still in flight) are ignored.
    pub fn on_report(&mut self, report: &ScanReport) -> Option<DeviceIdentity> {
        if !self.is_scanning() {
            debug!("Ignoring advertisement from {} outside a scan", report.address);
            return None;
        }
        let filter = self.filter.as_ref()?;
        if !filter.matches(report) {
            debug!("Found device - Address: {}, Name: {:?}, RSSI: {:?}", report.address, report.name, report.rssi);
            return None;
        }

        let name = report.name.clone().unwrap_or_default();
        let identity = DeviceIdentity::new(name, report.address.clone());
        info!("Found target device: {}", identity);

        self.halt();
        self.bus.emit(BleEvent::DeviceFound(identity.clone()));
        Some(identity)
    }

    /// Radio failure: reported, never retried here
    pub fn on_scan_failed(&mut self, code: i32) {
        if !self.is_scanning() {
            debug!("Ignoring scan failure {} outside a scan", code);
            return;
        }
        warn!("Scan failed with code {}", code);
        self.halt();
        self.bus.emit(BleEvent::ScanFailed(code));
    }
}

impl Drop for BluetoothScanner {
    fn drop(&mut self) {
        if self.is_scanning() {
            self.halt();
        }
    }
}
