use std::sync::Arc;

use anyhow::{Context, Result, bail};
use nest_sdm_client_rs::{
    PubSubSubscription, PushUpdate, ServiceAccountTokenProvider, SubscriptionTrait, TokenProvider,
    subscription_path,
};
use tracing::warn;

use crate::{Params, utils::token_provider};

pub async fn listen(
    params: &Params,
    subscription: &str,
    gcp_project_id: Option<&str>,
    service_account_key: Option<&str>,
    max_messages: u32,
) -> Result<()> {
    let path = match gcp_project_id {
        Some(project) => subscription_path(project, subscription),
        None if subscription.starts_with("projects/") => subscription.to_string(),
        None => bail!("a short subscription id needs --gcp-project-id"),
    };
    let tokens: Arc<dyn TokenProvider> = match service_account_key {
        Some(key) => Arc::new(
            ServiceAccountTokenProvider::from_file(key)
                .with_context(|| format!("Failed to load service account key {key}"))?,
        ),
        None => token_provider(&params.credentials)?,
    };
    let subscription = PubSubSubscription::new(path, tokens)?.with_max_messages(max_messages);
    println!("Listening on {} (Ctrl+C to stop)", subscription.subscription());

    loop {
        let messages = tokio::select! {
            messages = subscription.receive() => messages?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        for message in messages {
            match PushUpdate::decode(&message.data) {
                Ok(update) => {
                    println!(
                        "[{}] {} {}: {}",
                        update.timestamp,
                        update.event_id.as_deref().unwrap_or("-"),
                        update.resource_update.name.as_deref().unwrap_or("-"),
                        serde_json::to_string(&update.resource_update.traits)?
                    );
                    subscription.ack(&message.ack_id).await?;
                }
                Err(e) => {
                    warn!("Undecodable message {}: {e}", message.message_id);
                    subscription.nack(&message.ack_id).await?;
                }
            }
        }
    }
}
