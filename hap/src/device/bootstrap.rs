//! Startup sequence that resolves the one thermostat this bridge serves and
//! seeds the store with a full fetch.
//!
//! Listing is retried forever with capped exponential backoff, nothing else in
//! the bridge can start without a device identity. Everything after a
//! successful listing is fatal on failure.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use nest_sdm_client_rs::{SdmClientError, SdmClientTrait};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accessories::state::mapping::InvariantViolation;
use crate::accessories::state::thermostat::{Reconciler, TraitUpdate};
use crate::device::backoff::{Backoff, BackoffPolicy};
use crate::web::metrics::Metrics;
use crate::web::state::BridgeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    #[default]
    Idle,
    Listing,
    Retrying,
    Fetching,
    Ready,
    FailedFatal,
}

impl BootstrapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapState::Idle => "idle",
            BootstrapState::Listing => "listing",
            BootstrapState::Retrying => "retrying",
            BootstrapState::Fetching => "fetching",
            BootstrapState::Ready => "ready",
            BootstrapState::FailedFatal => "failed",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("expected exactly one thermostat, found {found}")]
    UnsupportedTopology { found: usize },
    #[error("full fetch of {device} failed: {source}")]
    Fetch {
        device: String,
        #[source]
        source: SdmClientError,
    },
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("bootstrap cancelled")]
    Cancelled,
}

/// What the rest of the bridge needs to know about the resolved device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    /// Full resource name, `enterprises/<project>/devices/<id>`.
    pub name: String,
    pub device_type: String,
    pub custom_name: Option<String>,
}

impl DeviceIdentity {
    /// Last path segment of the resource name.
    pub fn short_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn display_name(&self) -> &str {
        self.custom_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("Nest Thermostat")
    }
}

pub struct BootstrapFetcher {
    client: Arc<dyn SdmClientTrait>,
    policy: BackoffPolicy,
    state: BootstrapState,
    bridge_state: Option<BridgeState>,
}

impl BootstrapFetcher {
    pub fn new(client: Arc<dyn SdmClientTrait>, policy: BackoffPolicy) -> Self {
        Self {
            client,
            policy,
            state: BootstrapState::Idle,
            bridge_state: None,
        }
    }

    /// Mirror every transition into the shared web status.
    pub fn with_bridge_state(mut self, bridge_state: BridgeState) -> Self {
        bridge_state.set_bootstrap_state(self.state);
        self.bridge_state = Some(bridge_state);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn transition(&mut self, next: BootstrapState) {
        debug!(from = %self.state, to = %next, "Bootstrap transition");
        self.state = next;
        if let Some(bridge_state) = &self.bridge_state {
            bridge_state.set_bootstrap_state(next);
        }
    }

    fn fail(&mut self, err: BootstrapError) -> BootstrapError {
        error!("Bootstrap failed: {err}");
        self.transition(BootstrapState::FailedFatal);
        if let Some(bridge_state) = &self.bridge_state {
            bridge_state.set_error(Some(err.to_string()));
        }
        err
    }

    pub(crate) async fn run(
        &mut self,
        reconciler: &Reconciler,
        cancel: &CancellationToken,
    ) -> Result<DeviceIdentity, BootstrapError> {
        let mut backoff = Backoff::new(self.policy);

        let device = loop {
            self.transition(BootstrapState::Listing);
            Metrics::inc_bootstrap_attempts();
            let listed = tokio::select! {
                _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
                listed = self.client.list_devices() => listed,
            };

            match listed {
                Ok(mut devices) => {
                    if devices.len() != 1 {
                        return Err(self.fail(BootstrapError::UnsupportedTopology {
                            found: devices.len(),
                        }));
                    }
                    break devices.remove(0);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    if e.is_transient() {
                        warn!(attempt = backoff.attempts(), ?delay, "Listing devices failed: {e}");
                    } else {
                        error!(attempt = backoff.attempts(), ?delay, "Listing devices failed: {e}");
                    }
                    self.transition(BootstrapState::Retrying);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
            }
        };

        info!(device = %device.name, "Found thermostat");
        self.transition(BootstrapState::Fetching);
        // taken before the fetch so any push newer than the fetch still wins
        let fetched_at = Utc::now();
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
            fetched = self.client.get_device(&device.name) => fetched,
        };
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(source) => {
                return Err(self.fail(BootstrapError::Fetch {
                    device: device.name,
                    source,
                }));
            }
        };
        let update = match TraitUpdate::try_from(&fetched.traits) {
            Ok(update) => update,
            Err(e) => return Err(self.fail(e.into())),
        };
        reconciler.apply(&update, fetched_at).await;

        let identity = DeviceIdentity {
            name: device.name,
            device_type: fetched.device_type,
            custom_name: fetched
                .traits
                .custom_name()
                .or(device.traits.custom_name())
                .map(str::to_string),
        };
        self.transition(BootstrapState::Ready);
        info!(device = %identity.name, name = identity.display_name(), "Thermostat ready");
        Ok(identity)
    }
}
