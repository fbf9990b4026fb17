use crate::accessories::NestThermostatAccessory;
use crate::accessories::state::thermostat::{Reconciler, ThermostatStore};
use crate::device::bootstrap::{BootstrapError, BootstrapFetcher};
use crate::device::dispatcher::CommandDispatcher;
use crate::device::events::EventListener;
use crate::settings::Settings;
use crate::web::{self, metrics::Metrics, state::BridgeState};
use anyhow::{Context, Result};
use hap::{
    Config, MacAddress, Pin,
    accessory::{AccessoryCategory, AccessoryInformation, bridge::BridgeAccessory},
    server::{IpServer, Server},
    storage::{FileStorage, Storage},
};
use nest_sdm_client_rs::{
    OAuthToken, OAuthTokenProvider, PubSubSubscription, SdmClient, SdmClientTrait, SdmOptions,
    ServiceAccountTokenProvider, SubscriptionTrait, TokenProvider,
};
use rand::Rng;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const THERMOSTAT_AID: u64 = 2;

fn generate_setup_uri(pincode: &str, category: u64, setup_id: &str) -> String {
    let value_low = pincode.replace('-', "").parse::<u64>().unwrap_or(0);

    let version = 0;
    let reserved = 0;
    let flag = 2; // IP
    let mut payload: u64 = 0;

    payload |= version & 0x7;
    payload <<= 4;
    payload |= reserved & 0xf;

    payload <<= 8;
    payload |= category & 0xff;

    payload <<= 4;
    payload |= flag & 0xf;
    payload <<= 27u64;
    payload |= value_low & 0x07ff_ffff;

    format!("X-HM://{:0>9}{setup_id}", base36_encode(payload))
}

fn base36_encode(mut num: u64) -> String {
    let mut chars = Vec::new();
    while num > 0 {
        let rem = (num % 36) as u8;
        chars.push(if rem < 10 {
            (b'0' + rem) as char
        } else {
            (b'A' + rem - 10) as char
        });
        num /= 36;
    }
    chars.reverse();
    if chars.is_empty() {
        chars.push('0');
    }
    chars.into_iter().collect()
}

/// Four base36 characters, used when the settings do not pin a setup id.
fn random_setup_id() -> String {
    let value = rand::rng().random_range(36u64.pow(3)..36u64.pow(4));
    base36_encode(value)
}

fn device_mac() -> [u8; 6] {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => mac.bytes(),
        Ok(None) | Err(_) => {
            warn!("No network interface MAC address found, using a random device id");
            rand::rng().random()
        }
    }
}

async fn load_or_create_config(storage: &mut FileStorage, settings: &Settings) -> Result<Config> {
    match storage.load_config().await {
        Ok(mut config) => {
            info!("Loaded HAP config");
            if config.pin.to_string().replace('-', "") != settings.pairing_pin() {
                warn!("Stored pairing code differs from settings, keeping the stored one");
            }
            config.redetermine_local_ip();
            storage.save_config(&config).await?;
            Ok(config)
        }
        Err(_) => {
            info!("Creating new HAP config");
            let config = Config {
                pin: Pin::new(settings.pairing_code)?,
                name: settings.hub_name.clone(),
                port: settings.port,
                device_id: MacAddress::from(device_mac()),
                category: AccessoryCategory::Bridge,
                ..Default::default()
            };
            storage.save_config(&config).await?;
            Ok(config)
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, starting graceful shutdown");
    cancel.cancel();
}

pub async fn start_bridge(settings: Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let bridge_state = BridgeState::new();
    let metrics_handle =
        web::metrics::init_metrics().context("Failed to install metrics recorder")?;
    Metrics::set_bridge_info(env!("CARGO_PKG_VERSION"));
    web::start_web_server(
        &settings.web,
        bridge_state.clone(),
        metrics_handle,
        cancel.clone(),
    )
    .await
    .context("Failed to start web server")?;

    let token = OAuthToken::from_file(&settings.oauth_token_path).with_context(|| {
        format!(
            "Failed to read OAuth token from {}",
            settings.oauth_token_path.display()
        )
    })?;
    let tokens: Arc<dyn TokenProvider> = Arc::new(OAuthTokenProvider::new(
        settings.oauth_client_id.clone(),
        settings.oauth_client_secret.clone(),
        token,
    ));
    let options = SdmOptions::builder()
        .project_id(settings.sdm_project_id.clone())
        .build()?;
    let client: Arc<dyn SdmClientTrait> = Arc::new(SdmClient::new(options, tokens)?);

    // the user token only carries the Device Access scope
    let pubsub_tokens: Arc<dyn TokenProvider> = Arc::new(
        ServiceAccountTokenProvider::from_file(&settings.service_account_key).with_context(
            || {
                format!(
                    "Failed to load service account key from {}",
                    settings.service_account_key.display()
                )
            },
        )?,
    );
    let subscription: Arc<dyn SubscriptionTrait> = Arc::new(PubSubSubscription::new(
        settings.subscription_path(),
        pubsub_tokens,
    )?);

    let store = Arc::new(ThermostatStore::new());
    let reconciler = Arc::new(Reconciler::new(store.clone()));

    info!("Resolving thermostat...");
    let mut fetcher = BootstrapFetcher::new(client.clone(), settings.bootstrap_backoff)
        .with_bridge_state(bridge_state.clone());
    let identity = match fetcher.run(&reconciler, &cancel).await {
        Ok(identity) => identity,
        Err(BootstrapError::Cancelled) => {
            info!("Shutdown requested before the thermostat was resolved");
            return Ok(());
        }
        Err(e) => {
            cancel.cancel();
            return Err(e).context("Bootstrap failed");
        }
    };
    bridge_state.set_device(identity.clone(), store.clone());

    let bridge = BridgeAccessory::new(
        1,
        AccessoryInformation {
            name: settings.hub_name.clone(),
            serial_number: identity.short_id().to_string(),
            manufacturer: "Google Nest".into(),
            model: "Nest Hub Bridge".into(),
            ..Default::default()
        },
    )?;

    tokio::fs::create_dir_all(&settings.storage_path)
        .await
        .with_context(|| format!("Failed to create {}", settings.storage_path.display()))?;
    let mut storage = FileStorage::new(&settings.storage_path).await?;
    let config = load_or_create_config(&mut storage, &settings).await?;

    let pin = config.pin.to_string();
    let server = IpServer::new(config, storage).await?;
    info!("IP server created, adding bridge accessory...");
    server.add_accessory(bridge).await?;

    let dispatcher = CommandDispatcher::new(client, identity.name.clone(), store.clone());
    let thermostat = NestThermostatAccessory::new(
        THERMOSTAT_AID,
        &identity,
        store,
        dispatcher,
        bridge_state.clone(),
        &server,
    )
    .await
    .context("Failed to add thermostat accessory")?;
    reconciler.set_observer(Arc::new(thermostat));

    let listener = EventListener::new(subscription, reconciler, settings.ingestion_backoff)
        .for_device(identity.name.clone())
        .with_bridge_state(bridge_state.clone());
    let events = tokio::spawn({
        let cancel = cancel.clone();
        async move { listener.run(cancel).await }
    });

    info!("Starting HAP bridge server...");
    let handle = server.run_handle();
    let setup_id = settings.setup_id.clone().unwrap_or_else(random_setup_id);
    let uri = generate_setup_uri(&pin, AccessoryCategory::Bridge as u64, &setup_id);
    info!("PIN for the Bridge accessory is: {pin}, setup ID: {setup_id}, setup URI: {uri}");
    bridge_state.set_pairing(pin, uri);

    let result = tokio::select! {
        res = handle => res.context("HAP server stopped"),
        _ = cancel.cancelled() => Ok(()),
    };

    cancel.cancel();
    if let Err(e) = events.await {
        warn!("Event listener task failed: {e}");
    }
    result
}
