use std::sync::Arc;

use nest_sdm_client_rs::{PushMessage, PushUpdate, SubscriptionTrait};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accessories::state::thermostat::{Reconciler, TraitUpdate};
use crate::device::backoff::{Backoff, BackoffPolicy};
use crate::web::metrics::Metrics;
use crate::web::state::BridgeState;

/// What happened to a single pulled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Decoded and merged, acknowledged even when nothing was newer.
    Reconciled { changes: usize },
    /// Addressed to another resource, acknowledged without touching the store.
    Skipped,
    /// Payload could not be decoded, negatively acknowledged.
    Malformed,
    /// Payload carried a value outside the known vocabulary, negatively acknowledged.
    Rejected,
}

impl MessageOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(
            self,
            MessageOutcome::Reconciled { .. } | MessageOutcome::Skipped
        )
    }
}

/// Long-lived consumer of the device event subscription.
pub struct EventListener {
    subscription: Arc<dyn SubscriptionTrait>,
    reconciler: Arc<Reconciler>,
    device: Option<String>,
    policy: BackoffPolicy,
    bridge_state: Option<BridgeState>,
}

impl EventListener {
    pub(crate) fn new(
        subscription: Arc<dyn SubscriptionTrait>,
        reconciler: Arc<Reconciler>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            subscription,
            reconciler,
            device: None,
            policy,
            bridge_state: None,
        }
    }

    /// Only reconcile events naming this resource. Events without a name are
    /// always accepted.
    pub fn for_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_bridge_state(mut self, bridge_state: BridgeState) -> Self {
        self.bridge_state = Some(bridge_state);
        self
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.policy);
        info!(device = ?self.device, "Listening for device events");
        self.set_listening(true);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.subscription.receive() => received,
            };

            let delay = match received {
                Ok(messages) => {
                    if let Some(bridge_state) = &self.bridge_state {
                        bridge_state.record_receive_success();
                    }
                    let mut acked = 0;
                    for message in &messages {
                        if self.handle_message(message).await.is_acked() {
                            acked += 1;
                        }
                    }
                    if messages.is_empty() || acked > 0 {
                        backoff.reset();
                        continue;
                    }
                    // nothing usable came back, do not spin on redeliveries
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = backoff.attempts(),
                        ?delay,
                        "All {} pulled events were rejected",
                        messages.len()
                    );
                    delay
                }
                Err(e) => {
                    Metrics::inc_receive_failures();
                    if let Some(bridge_state) = &self.bridge_state {
                        bridge_state.record_receive_failure(e.to_string());
                    }
                    let delay = backoff.next_delay();
                    warn!(attempt = backoff.attempts(), ?delay, "Receiving events failed: {e}");
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_listening(false);
        info!("Event listener stopped");
    }

    pub async fn handle_message(&self, message: &PushMessage) -> MessageOutcome {
        let outcome = self.process(message).await;
        let settled = if outcome.is_acked() {
            self.subscription.ack(&message.ack_id).await
        } else {
            self.subscription.nack(&message.ack_id).await
        };
        if let Err(e) = settled {
            warn!(message_id = %message.message_id, ?outcome, "Failed to settle message: {e}");
        }
        Metrics::inc_messages(outcome.is_acked());
        if let Some(bridge_state) = &self.bridge_state {
            bridge_state.record_message(outcome);
        }
        outcome
    }

    async fn process(&self, message: &PushMessage) -> MessageOutcome {
        let update = match PushUpdate::decode(&message.data) {
            Ok(update) => update,
            Err(e) => {
                warn!(message_id = %message.message_id, "Dropping undecodable event: {e}");
                return MessageOutcome::Malformed;
            }
        };

        if let (Some(expected), Some(name)) = (&self.device, &update.resource_update.name) {
            if expected != name {
                debug!(
                    message_id = %message.message_id,
                    resource = %name,
                    "Event for another resource"
                );
                return MessageOutcome::Skipped;
            }
        }

        let traits = match TraitUpdate::try_from(&update.resource_update.traits) {
            Ok(traits) => traits,
            Err(e) => {
                error!(message_id = %message.message_id, "Rejecting event: {e}");
                return MessageOutcome::Rejected;
            }
        };

        if traits.is_empty() {
            debug!(message_id = %message.message_id, "Event carried no thermostat traits");
        }
        let changes = self.reconciler.apply(&traits, update.timestamp).await;
        debug!(
            message_id = %message.message_id,
            event_id = update.event_id.as_deref().unwrap_or("-"),
            timestamp = %update.timestamp,
            changes = changes.len(),
            "Event reconciled"
        );
        MessageOutcome::Reconciled {
            changes: changes.len(),
        }
    }

    fn set_listening(&self, listening: bool) {
        if let Some(bridge_state) = &self.bridge_state {
            bridge_state.set_listening(listening);
        }
    }
}
