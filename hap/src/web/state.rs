//! Shared bridge state for the status API and metrics.
//!
//! This module defines the shared state that is accessible from both
//! the bridge runtime and the web server.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use crate::accessories::state::thermostat::{DeviceState, ThermostatStore};
use crate::device::bootstrap::{BootstrapState, DeviceIdentity};
use crate::device::events::MessageOutcome;

/// Consecutive failed receives after which the bridge reports unhealthy.
const UNHEALTHY_RECEIVE_FAILURES: u64 = 3;

/// Message counters, by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounters {
    pub reconciled: u64,
    pub skipped: u64,
    pub malformed: u64,
    pub rejected: u64,
    /// Field changes applied to the store by reconciled messages.
    pub changes: u64,
}

impl MessageCounters {
    pub fn acked(&self) -> u64 {
        self.reconciled + self.skipped
    }

    pub fn nacked(&self) -> u64 {
        self.malformed + self.rejected
    }
}

/// Internal mutable state.
#[derive(Debug)]
struct BridgeStateInner {
    /// Bridge start time.
    start_time: Instant,
    bootstrap_state: BootstrapState,
    /// Whether the event listener is currently running.
    listening: bool,
    /// HomeKit pairing PIN.
    pairing_pin: String,
    /// HomeKit setup URI (for QR code).
    pairing_url: String,
    device: Option<DeviceIdentity>,
    store: Option<Arc<ThermostatStore>>,
    messages: MessageCounters,
    last_message: Option<Instant>,
    receive_failures: u64,
    /// Reset by every successful receive.
    consecutive_receive_failures: u64,
    commands_sent: u64,
    commands_failed: u64,
    /// Error message if any.
    last_error: Option<String>,
}

/// Shared bridge state.
///
/// This is thread-safe and can be shared between the bridge and web server.
#[derive(Debug, Clone)]
pub struct BridgeState {
    inner: Arc<RwLock<BridgeStateInner>>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeState {
    /// Create a new bridge state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BridgeStateInner {
                start_time: Instant::now(),
                bootstrap_state: BootstrapState::Idle,
                listening: false,
                pairing_pin: String::new(),
                pairing_url: String::new(),
                device: None,
                store: None,
                messages: MessageCounters::default(),
                last_message: None,
                receive_failures: 0,
                consecutive_receive_failures: 0,
                commands_sent: 0,
                commands_failed: 0,
                last_error: None,
            })),
        }
    }

    /// Get the bridge start time.
    pub fn start_time(&self) -> Instant {
        self.inner.read().start_time
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.inner.read().bootstrap_state
    }

    pub fn set_bootstrap_state(&self, state: BootstrapState) {
        self.inner.write().bootstrap_state = state;
    }

    pub fn is_listening(&self) -> bool {
        self.inner.read().listening
    }

    pub fn set_listening(&self, listening: bool) {
        self.inner.write().listening = listening;
    }

    /// Set the pairing PIN and setup URI.
    pub fn set_pairing(&self, pin: String, url: String) {
        let mut inner = self.inner.write();
        inner.pairing_pin = pin;
        inner.pairing_url = url;
    }

    /// Attach the resolved device and the store the status API reads from.
    pub fn set_device(&self, device: DeviceIdentity, store: Arc<ThermostatStore>) {
        let mut inner = self.inner.write();
        inner.device = Some(device);
        inner.store = Some(store);
    }

    pub fn record_message(&self, outcome: MessageOutcome) {
        let mut inner = self.inner.write();
        inner.last_message = Some(Instant::now());
        match outcome {
            MessageOutcome::Reconciled { changes } => {
                inner.messages.reconciled += 1;
                inner.messages.changes += changes as u64;
            }
            MessageOutcome::Skipped => inner.messages.skipped += 1,
            MessageOutcome::Malformed => inner.messages.malformed += 1,
            MessageOutcome::Rejected => inner.messages.rejected += 1,
        }
    }

    pub fn record_receive_failure(&self, error: String) {
        let mut inner = self.inner.write();
        inner.receive_failures += 1;
        inner.consecutive_receive_failures += 1;
        inner.last_error = Some(error);
    }

    pub fn record_receive_success(&self) {
        self.inner.write().consecutive_receive_failures = 0;
    }

    pub fn record_command(&self, success: bool) {
        let mut inner = self.inner.write();
        if success {
            inner.commands_sent += 1;
        } else {
            inner.commands_failed += 1;
        }
    }

    #[cfg(test)]
    pub fn messages(&self) -> MessageCounters {
        self.inner.read().messages
    }

    /// Set an error message.
    pub fn set_error(&self, error: Option<String>) {
        self.inner.write().last_error = error;
    }

    /// Get the last error message.
    #[cfg(test)]
    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// Ready once bootstrap finished and events are flowing in.
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.read();
        inner.bootstrap_state == BootstrapState::Ready
            && inner.listening
            && inner.consecutive_receive_failures < UNHEALTHY_RECEIVE_FAILURES
    }

    /// Get a summary of the bridge state for the status API.
    pub fn summary(&self) -> BridgeStateSummary {
        let inner = self.inner.read();
        BridgeStateSummary {
            uptime_seconds: inner.start_time.elapsed().as_secs(),
            bootstrap_state: inner.bootstrap_state,
            listening: inner.listening,
            pairing_pin: inner.pairing_pin.clone(),
            pairing_url: inner.pairing_url.clone(),
            device: inner.device.clone(),
            // store lock is taken while holding ours, never the other way round
            device_state: inner.store.as_ref().map(|store| store.snapshot()),
            messages: inner.messages,
            last_message_seconds_ago: inner.last_message.map(|t| t.elapsed().as_secs()),
            receive_failures: inner.receive_failures,
            commands_sent: inner.commands_sent,
            commands_failed: inner.commands_failed,
            last_error: inner.last_error.clone(),
        }
    }
}

/// Summary of the bridge state for the status API.
#[derive(Debug, Clone)]
pub struct BridgeStateSummary {
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    pub bootstrap_state: BootstrapState,
    pub listening: bool,
    /// HomeKit pairing PIN.
    pub pairing_pin: String,
    /// HomeKit setup URI.
    pub pairing_url: String,
    pub device: Option<DeviceIdentity>,
    pub device_state: Option<DeviceState>,
    pub messages: MessageCounters,
    pub last_message_seconds_ago: Option<u64>,
    pub receive_failures: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

impl BridgeStateSummary {
    /// Format uptime as a human-readable string.
    pub fn uptime_display(&self) -> String {
        let secs = self.uptime_seconds;
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if days > 0 {
            format!("{}d {}h {}m {}s", days, hours, mins, secs)
        } else if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}
