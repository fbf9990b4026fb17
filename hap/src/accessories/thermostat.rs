use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use hap::characteristic::HapCharacteristic;
use hap::pointer::Accessory;
use hap::server::Server;
use hap::{
    HapType,
    accessory::{AccessoryInformation, HapAccessory},
    characteristic::AsyncCharacteristicCallbacks,
    server::IpServer,
    service::{
        HapService, accessory_information::AccessoryInformationService,
        thermostat::ThermostatService,
    },
};
use serde::{
    Serialize,
    ser::{SerializeStruct, Serializer},
};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::accessories::state::mapping::{
    current_mode_to_code, display_unit_to_code, target_mode_to_code,
};
use crate::accessories::state::thermostat::{StateChange, StateObserver, ThermostatStore};
use crate::device::bootstrap::DeviceIdentity;
use crate::device::dispatcher::CommandDispatcher;
use crate::web::state::BridgeState;

// HomeKit's Target Temperature range
const MIN_TARGET_TEMPERATURE: f64 = 10.0;
const MAX_TARGET_TEMPERATURE: f64 = 38.0;

/// OFF reports 0 which HomeKit would reject.
fn hap_target_temperature(value: f64) -> f32 {
    value.clamp(MIN_TARGET_TEMPERATURE, MAX_TARGET_TEMPERATURE) as f32
}

#[derive(Debug)]
struct NestThermostat {
    id: u64,
    /// Accessory Information service.
    pub accessory_information: AccessoryInformationService,
    /// Thermostat service.
    pub thermostat: ThermostatService,
}

impl HapAccessory for NestThermostat {
    fn get_id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn get_service(&self, hap_type: HapType) -> Option<&dyn HapService> {
        self.get_services()
            .into_iter()
            .find(|&service| service.get_type() == hap_type)
    }

    fn get_mut_service(&mut self, hap_type: HapType) -> Option<&mut dyn HapService> {
        self.get_mut_services()
            .into_iter()
            .find(|service| service.get_type() == hap_type)
    }

    fn get_services(&self) -> Vec<&dyn HapService> {
        vec![&self.accessory_information, &self.thermostat]
    }

    fn get_mut_services(&mut self) -> Vec<&mut dyn HapService> {
        vec![&mut self.accessory_information, &mut self.thermostat]
    }
}

impl Serialize for NestThermostat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("HapAccessory", 2)?;
        state.serialize_field("aid", &self.get_id())?;
        state.serialize_field("services", &self.get_services())?;
        state.end()
    }
}

impl NestThermostat {
    fn new(id: u64, identity: &DeviceIdentity) -> Result<Self> {
        let accessory_information = AccessoryInformation {
            manufacturer: "Google Nest".to_string(),
            model: identity.device_type.clone(),
            serial_number: identity.short_id().to_string(),
            name: identity.display_name().to_string(),
            ..Default::default()
        }
        .to_service(1, id)?;

        let thermo_id = accessory_information.get_characteristics().len() as u64;
        let mut thermostat = ThermostatService::new(1 + thermo_id + 1, id);
        // mode, temperature and display unit only
        thermostat.cooling_threshold_temperature = None;
        thermostat.heating_threshold_temperature = None;
        thermostat.current_relative_humidity = None;
        thermostat.target_relative_humidity = None;
        thermostat.set_primary(true);

        Ok(Self {
            id,
            accessory_information,
            thermostat,
        })
    }
}

/// HomeKit face of the thermostat. Reads come from the store only, writes go
/// to the dispatcher, and reconciled changes are pushed back as notifications.
pub(crate) struct NestThermostatAccessory {
    accessory: Accessory,
}

impl NestThermostatAccessory {
    pub async fn new(
        id: u64,
        identity: &DeviceIdentity,
        store: Arc<ThermostatStore>,
        dispatcher: CommandDispatcher,
        bridge_state: BridgeState,
        server: &IpServer,
    ) -> Result<Self> {
        let mut accessory = NestThermostat::new(id, identity)?;
        let state = store.snapshot();
        info!(device = %identity.name, "Creating thermostat accessory with state: {:?}", state);

        let service = &mut accessory.thermostat;

        if let Some(temperature) = store.current_temperature() {
            service
                .current_temperature
                .set_value(Value::from(temperature as f32))
                .await?;
        }
        let store_ = Arc::clone(&store);
        service.current_temperature.on_read_async(Some(move || {
            let store = store_.clone();
            async move { Ok(store.current_temperature().map(|t| t as f32)) }.boxed()
        }));

        if let Some(target) = store.effective_target_temperature() {
            service
                .target_temperature
                .set_value(Value::from(hap_target_temperature(target)))
                .await?;
        }
        let store_ = Arc::clone(&store);
        service.target_temperature.on_read_async(Some(move || {
            let store = store_.clone();
            async move {
                Ok(store
                    .effective_target_temperature()
                    .map(hap_target_temperature))
            }
            .boxed()
        }));

        if let Some(status) = store.current_mode() {
            service
                .current_heating_cooling_state
                .set_value(Value::from(current_mode_to_code(status)))
                .await?;
        }
        let store_ = Arc::clone(&store);
        service
            .current_heating_cooling_state
            .on_read_async(Some(move || {
                let store = store_.clone();
                async move { Ok(store.current_mode().map(current_mode_to_code)) }.boxed()
            }));

        if let Some(mode) = store.target_mode() {
            service
                .target_heating_cooling_state
                .set_value(Value::from(target_mode_to_code(mode)))
                .await?;
        }
        let store_ = Arc::clone(&store);
        service
            .target_heating_cooling_state
            .on_read_async(Some(move || {
                let store = store_.clone();
                async move { Ok(store.target_mode().map(target_mode_to_code)) }.boxed()
            }));

        if let Some(unit) = store.display_unit() {
            service
                .temperature_display_units
                .set_value(Value::from(display_unit_to_code(unit)))
                .await?;
        }
        let store_ = Arc::clone(&store);
        service
            .temperature_display_units
            .on_read_async(Some(move || {
                let store = store_.clone();
                async move { Ok(store.display_unit().map(display_unit_to_code)) }.boxed()
            }));

        let dispatcher_ = dispatcher.clone();
        let bridge_state_ = bridge_state.clone();
        service
            .target_temperature
            .on_update_async(Some(move |prev: f32, new: f32| {
                let dispatcher = dispatcher_.clone();
                let bridge_state = bridge_state_.clone();
                async move {
                    debug!("Target temperature updated from {} to {}", prev, new);
                    let result = dispatcher.set_target_temperature(new as f64).await;
                    bridge_state.record_command(result.is_ok());
                    if let Err(e) = &result {
                        error!(
                            device = dispatcher.device(),
                            "Failed to set target temperature {new}: {e}"
                        );
                    }
                    result?;
                    Ok(())
                }
                .boxed()
            }));

        let dispatcher_ = dispatcher.clone();
        let bridge_state_ = bridge_state.clone();
        service
            .target_heating_cooling_state
            .on_update_async(Some(move |prev: u8, new: u8| {
                let dispatcher = dispatcher_.clone();
                let bridge_state = bridge_state_.clone();
                async move {
                    debug!("Target heating cooling state updated from {} to {}", prev, new);
                    let result = dispatcher.set_target_mode(new).await;
                    bridge_state.record_command(result.is_ok());
                    if let Err(e) = &result {
                        error!(device = dispatcher.device(), "Failed to set mode {new}: {e}");
                    }
                    result?;
                    Ok(())
                }
                .boxed()
            }));

        let accessory = server.add_accessory(accessory).await?;
        Ok(Self { accessory })
    }
}

#[async_trait]
impl StateObserver for NestThermostatAccessory {
    async fn state_changed(&self, changes: &[StateChange]) {
        let mut accessory = self.accessory.lock().await;
        let Some(service) = accessory.get_mut_service(HapType::Thermostat) else {
            error!("Thermostat service not found");
            return;
        };

        for change in changes {
            let (hap_type, value) = match *change {
                StateChange::CurrentTemperature(t) => {
                    (HapType::CurrentTemperature, Value::from(t as f32))
                }
                StateChange::TargetTemperature(t) => {
                    (HapType::TargetTemperature, Value::from(hap_target_temperature(t)))
                }
                StateChange::CurrentHeatingCoolingState(code) => {
                    (HapType::CurrentHeatingCoolingState, Value::from(code))
                }
                StateChange::TargetHeatingCoolingState(code) => {
                    (HapType::TargetHeatingCoolingState, Value::from(code))
                }
                StateChange::TemperatureDisplayUnits(code) => {
                    (HapType::TemperatureDisplayUnits, Value::from(code))
                }
            };
            if let Some(characteristic) = service.get_mut_characteristic(hap_type) {
                if let Err(e) = characteristic.update_value(value).await {
                    error!("Failed to push {:?}: {}", change, e);
                }
            }
        }
    }
}
