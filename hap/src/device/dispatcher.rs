use std::sync::Arc;

use nest_sdm_client_rs::{DeviceCommand, SdmClientError, SdmClientTrait, ThermostatMode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::accessories::state::mapping::{InvariantViolation, target_mode_from_code};
use crate::accessories::state::thermostat::ThermostatStore;
use crate::web::metrics::Metrics;

/// Half of the gap kept between the heat and cool setpoints in HEATCOOL mode.
pub const HEATCOOL_DEADBAND: f64 = 2.5;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("thermostat mode is not known yet")]
    NotReady,
    #[error(transparent)]
    Remote(#[from] SdmClientError),
}

/// Sends HomeKit writes to the cloud. It never writes to the store: the new
/// values come back through the event stream like any other change.
#[derive(Clone)]
pub struct CommandDispatcher {
    client: Arc<dyn SdmClientTrait>,
    device: String,
    store: Arc<ThermostatStore>,
}

impl CommandDispatcher {
    pub(crate) fn new(
        client: Arc<dyn SdmClientTrait>,
        device: impl Into<String>,
        store: Arc<ThermostatStore>,
    ) -> Self {
        Self {
            client,
            device: device.into(),
            store,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn set_target_mode(&self, code: u8) -> Result<(), DispatchError> {
        let mode = target_mode_from_code(code)?;
        info!(device = %self.device, %mode, "Setting thermostat mode");
        self.execute(DeviceCommand::SetMode(mode)).await
    }

    pub async fn set_target_temperature(&self, value: f64) -> Result<(), DispatchError> {
        // advisory read, the lock is released before the remote call
        let mode = self.store.target_mode().ok_or(DispatchError::NotReady)?;
        let command = match mode {
            ThermostatMode::Off => {
                debug!(device = %self.device, value, "Thermostat is off, ignoring setpoint");
                return Ok(());
            }
            ThermostatMode::Heat => DeviceCommand::SetHeat(value),
            ThermostatMode::Cool => DeviceCommand::SetCool(value),
            ThermostatMode::HeatCool => DeviceCommand::SetRange {
                heat: value - HEATCOOL_DEADBAND,
                cool: value + HEATCOOL_DEADBAND,
            },
        };
        info!(device = %self.device, %mode, value, "Setting target temperature");
        self.execute(command).await
    }

    async fn execute(&self, command: DeviceCommand) -> Result<(), DispatchError> {
        match self.client.execute_command(&self.device, &command).await {
            Ok(()) => {
                Metrics::inc_commands(command.name(), true);
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.device, command = command.name(), "Command failed: {e}");
                Metrics::inc_commands(command.name(), false);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accessories::state::thermostat::TraitUpdate;
    use async_trait::async_trait;
    use chrono::Utc;
    use nest_sdm_client_rs::Device;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    pub(crate) const DEVICE: &str = "enterprises/project-id/devices/device-id";

    #[derive(Default)]
    pub(crate) struct FakeSdmClient {
        pub(crate) devices: RwLock<Vec<Device>>,
        pub(crate) commands: RwLock<Vec<(String, DeviceCommand)>>,
        /// Virtual instant of every listing call, for backoff assertions.
        pub(crate) list_calls: RwLock<Vec<tokio::time::Instant>>,
        /// Listing fails this many times before succeeding.
        pub(crate) list_failures: RwLock<u32>,
        pub(crate) should_fail: AtomicBool,
    }

    impl FakeSdmClient {
        pub(crate) fn with_devices(devices: Vec<Device>) -> Self {
            Self {
                devices: RwLock::new(devices),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SdmClientTrait for FakeSdmClient {
        async fn list_devices(&self) -> Result<Vec<Device>, SdmClientError> {
            self.list_calls
                .write()
                .await
                .push(tokio::time::Instant::now());
            let mut failures = self.list_failures.write().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(SdmClientError::Generic("listing unavailable".to_string()));
            }
            Ok(self.devices.read().await.clone())
        }

        async fn get_device(&self, name: &str) -> Result<Device, SdmClientError> {
            if self.should_fail.load(Ordering::Relaxed) {
                return Err(SdmClientError::Generic("Fake error".to_string()));
            }
            self.devices
                .read()
                .await
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .ok_or_else(|| SdmClientError::Generic(format!("no device {name}")))
        }

        async fn execute_command(
            &self,
            name: &str,
            command: &DeviceCommand,
        ) -> Result<(), SdmClientError> {
            if self.should_fail.load(Ordering::Relaxed) {
                return Err(SdmClientError::Generic("Fake error".to_string()));
            }
            self.commands
                .write()
                .await
                .push((name.to_string(), *command));
            Ok(())
        }
    }

    fn store_in_mode(mode: Option<ThermostatMode>) -> Arc<ThermostatStore> {
        let store = Arc::new(ThermostatStore::new());
        store.apply_update(
            &TraitUpdate {
                target_mode: mode,
                target_heat_setpoint: Some(19.0),
                target_cool_setpoint: Some(23.0),
                ..Default::default()
            },
            Utc::now(),
        );
        store
    }

    fn dispatcher(
        client: &Arc<FakeSdmClient>,
        store: &Arc<ThermostatStore>,
    ) -> CommandDispatcher {
        CommandDispatcher::new(client.clone(), DEVICE, store.clone())
    }

    #[tokio::test]
    async fn heatcool_setpoint_straddles_the_target() {
        let client = Arc::new(FakeSdmClient::default());
        let store = store_in_mode(Some(ThermostatMode::HeatCool));
        dispatcher(&client, &store)
            .set_target_temperature(21.0)
            .await
            .unwrap();

        let commands = client.commands.read().await;
        assert_eq!(
            *commands,
            vec![(
                DEVICE.to_string(),
                DeviceCommand::SetRange {
                    heat: 18.5,
                    cool: 23.5
                }
            )]
        );
    }

    #[tokio::test]
    async fn setpoint_while_off_sends_nothing() {
        let client = Arc::new(FakeSdmClient::default());
        let store = store_in_mode(Some(ThermostatMode::Off));
        dispatcher(&client, &store)
            .set_target_temperature(21.0)
            .await
            .unwrap();
        assert!(client.commands.read().await.is_empty());
    }

    #[tokio::test]
    async fn single_setpoint_modes_send_one_command() {
        let client = Arc::new(FakeSdmClient::default());
        let heat = store_in_mode(Some(ThermostatMode::Heat));
        dispatcher(&client, &heat)
            .set_target_temperature(20.0)
            .await
            .unwrap();
        let cool = store_in_mode(Some(ThermostatMode::Cool));
        dispatcher(&client, &cool)
            .set_target_temperature(24.0)
            .await
            .unwrap();

        let commands = client.commands.read().await;
        assert_eq!(commands[0].1, DeviceCommand::SetHeat(20.0));
        assert_eq!(commands[1].1, DeviceCommand::SetCool(24.0));
    }

    #[tokio::test]
    async fn setpoint_before_mode_is_known_is_rejected() {
        let client = Arc::new(FakeSdmClient::default());
        let store = store_in_mode(None);
        let err = dispatcher(&client, &store)
            .set_target_temperature(21.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotReady));
    }

    #[tokio::test]
    async fn set_mode_maps_local_code_and_leaves_store_alone() {
        let client = Arc::new(FakeSdmClient::default());
        let store = store_in_mode(Some(ThermostatMode::Heat));
        let before = store.snapshot();

        dispatcher(&client, &store).set_target_mode(3).await.unwrap();

        assert_eq!(
            client.commands.read().await[0].1,
            DeviceCommand::SetMode(ThermostatMode::HeatCool)
        );
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn unknown_mode_code_is_an_invariant_violation() {
        let client = Arc::new(FakeSdmClient::default());
        let store = store_in_mode(Some(ThermostatMode::Heat));
        let err = dispatcher(&client, &store)
            .set_target_mode(4)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Invariant(_)));
        assert!(client.commands.read().await.is_empty());
    }

    #[tokio::test]
    async fn remote_failure_is_surfaced() {
        let client = Arc::new(FakeSdmClient::default());
        client.should_fail.store(true, Ordering::Relaxed);
        let store = store_in_mode(Some(ThermostatMode::Cool));
        let err = dispatcher(&client, &store)
            .set_target_temperature(22.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Remote(SdmClientError::Generic(_))));
        assert_eq!(store.target_cool_setpoint(), Some(23.0));
    }
}
