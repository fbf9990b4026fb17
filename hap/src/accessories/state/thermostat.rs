use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nest_sdm_client_rs::{DeviceTraits, HvacStatus, TemperatureScale, ThermostatMode};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use crate::accessories::state::mapping::{
    InvariantViolation, current_mode_to_code, display_unit_to_code, parse_cloud,
    target_mode_to_code,
};
use crate::web::metrics::Metrics;

/// A reconciled value together with the instant the cloud asserted it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct Field<T> {
    pub(crate) value: T,
    pub(crate) last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct DeviceState {
    pub(crate) current_mode: Option<Field<HvacStatus>>,
    pub(crate) current_temperature: Option<Field<f64>>,
    pub(crate) target_mode: Option<Field<ThermostatMode>>,
    pub(crate) target_heat_setpoint: Option<Field<f64>>,
    pub(crate) target_cool_setpoint: Option<Field<f64>>,
    pub(crate) display_unit: Option<Field<TemperatureScale>>,
}

impl DeviceState {
    /// OFF reports 0, HEATCOOL the midpoint of the two setpoints. `None` until
    /// the mode and the setpoints it needs have been reconciled.
    pub(crate) fn effective_target_temperature(&self) -> Option<f64> {
        let heat = self.target_heat_setpoint.map(|f| f.value);
        let cool = self.target_cool_setpoint.map(|f| f.value);
        match self.target_mode?.value {
            ThermostatMode::Off => Some(0.0),
            ThermostatMode::Heat => heat,
            ThermostatMode::Cool => cool,
            ThermostatMode::HeatCool => Some((heat? + cool?) / 2.0),
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        *self == DeviceState::default()
    }
}

/// Partial update carried by a push message or produced by a full fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TraitUpdate {
    pub(crate) current_mode: Option<HvacStatus>,
    pub(crate) current_temperature: Option<f64>,
    pub(crate) target_mode: Option<ThermostatMode>,
    pub(crate) target_heat_setpoint: Option<f64>,
    pub(crate) target_cool_setpoint: Option<f64>,
    pub(crate) display_unit: Option<TemperatureScale>,
}

// Empty strings and numeric zero are how the cloud says "not reported".
fn present_str(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn present_num(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

impl TryFrom<&DeviceTraits> for TraitUpdate {
    type Error = InvariantViolation;

    fn try_from(traits: &DeviceTraits) -> Result<Self, Self::Error> {
        Ok(Self {
            current_mode: present_str(traits.hvac_status())
                .map(parse_cloud)
                .transpose()?,
            current_temperature: present_num(traits.ambient_celsius()),
            target_mode: present_str(traits.thermostat_mode())
                .map(parse_cloud)
                .transpose()?,
            target_heat_setpoint: present_num(traits.heat_celsius()),
            target_cool_setpoint: present_num(traits.cool_celsius()),
            display_unit: present_str(traits.temperature_scale())
                .map(parse_cloud)
                .transpose()?,
        })
    }
}

impl TraitUpdate {
    pub(crate) fn is_empty(&self) -> bool {
        *self == TraitUpdate::default()
    }
}

/// Characteristic values that must be pushed to HomeKit after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StateChange {
    CurrentTemperature(f64),
    TargetTemperature(f64),
    CurrentHeatingCoolingState(u8),
    TargetHeatingCoolingState(u8),
    TemperatureDisplayUnits(u8),
}

fn merge<T: Copy>(slot: &mut Option<Field<T>>, candidate: Option<T>, at: DateTime<Utc>) -> bool {
    let Some(value) = candidate else {
        return false;
    };
    if matches!(slot, Some(current) if at <= current.last_updated) {
        return false;
    }
    *slot = Some(Field {
        value,
        last_updated: at,
    });
    true
}

/// Authoritative snapshot of the thermostat. Every access goes through one lock
/// that is never held across an await point.
#[derive(Debug, Default)]
pub(crate) struct ThermostatStore {
    state: Mutex<DeviceState>,
}

impl ThermostatStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Per-field last-write-wins merge. Returns the characteristics whose
    /// value was replaced.
    pub(crate) fn apply_update(
        &self,
        update: &TraitUpdate,
        timestamp: DateTime<Utc>,
    ) -> Vec<StateChange> {
        let mut state = self.state.lock();
        let mut changes = Vec::new();

        if merge(&mut state.current_mode, update.current_mode, timestamp) {
            if let Some(field) = state.current_mode {
                changes.push(StateChange::CurrentHeatingCoolingState(
                    current_mode_to_code(field.value),
                ));
            }
        }
        if merge(
            &mut state.current_temperature,
            update.current_temperature,
            timestamp,
        ) {
            if let Some(field) = state.current_temperature {
                changes.push(StateChange::CurrentTemperature(field.value));
            }
        }
        let mode_changed = merge(&mut state.target_mode, update.target_mode, timestamp);
        if mode_changed {
            if let Some(field) = state.target_mode {
                changes.push(StateChange::TargetHeatingCoolingState(
                    target_mode_to_code(field.value),
                ));
            }
        }
        let heat_changed = merge(
            &mut state.target_heat_setpoint,
            update.target_heat_setpoint,
            timestamp,
        );
        let cool_changed = merge(
            &mut state.target_cool_setpoint,
            update.target_cool_setpoint,
            timestamp,
        );
        if mode_changed || heat_changed || cool_changed {
            if let Some(target) = state.effective_target_temperature() {
                changes.push(StateChange::TargetTemperature(target));
            }
        }
        if merge(&mut state.display_unit, update.display_unit, timestamp) {
            if let Some(field) = state.display_unit {
                changes.push(StateChange::TemperatureDisplayUnits(display_unit_to_code(
                    field.value,
                )));
            }
        }

        trace!(?timestamp, changed = changes.len(), "Applied trait update");
        changes
    }

    pub(crate) fn current_mode(&self) -> Option<HvacStatus> {
        self.state.lock().current_mode.map(|f| f.value)
    }

    pub(crate) fn current_temperature(&self) -> Option<f64> {
        self.state.lock().current_temperature.map(|f| f.value)
    }

    pub(crate) fn target_mode(&self) -> Option<ThermostatMode> {
        self.state.lock().target_mode.map(|f| f.value)
    }

    #[cfg(test)]
    pub(crate) fn target_heat_setpoint(&self) -> Option<f64> {
        self.state.lock().target_heat_setpoint.map(|f| f.value)
    }

    #[cfg(test)]
    pub(crate) fn target_cool_setpoint(&self) -> Option<f64> {
        self.state.lock().target_cool_setpoint.map(|f| f.value)
    }

    pub(crate) fn display_unit(&self) -> Option<TemperatureScale> {
        self.state.lock().display_unit.map(|f| f.value)
    }

    pub(crate) fn effective_target_temperature(&self) -> Option<f64> {
        self.state.lock().effective_target_temperature()
    }

    pub(crate) fn snapshot(&self) -> DeviceState {
        self.state.lock().clone()
    }

    /// True once at least one field has been reconciled.
    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        !self.state.lock().is_empty()
    }
}

#[async_trait]
pub(crate) trait StateObserver: Send + Sync {
    async fn state_changed(&self, changes: &[StateChange]);
}

/// Single write path into the store. Observers are notified after the store
/// lock has been released.
pub(crate) struct Reconciler {
    store: Arc<ThermostatStore>,
    observer: RwLock<Option<Arc<dyn StateObserver>>>,
}

impl Reconciler {
    pub(crate) fn new(store: Arc<ThermostatStore>) -> Self {
        Self {
            store,
            observer: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Arc<ThermostatStore> {
        &self.store
    }

    pub(crate) fn set_observer(&self, observer: Arc<dyn StateObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub(crate) async fn apply(
        &self,
        update: &TraitUpdate,
        timestamp: DateTime<Utc>,
    ) -> Vec<StateChange> {
        let changes = self.store.apply_update(update, timestamp);
        if changes.is_empty() {
            debug!(?timestamp, "Update carried nothing newer than the store");
            return changes;
        }
        Metrics::inc_reconciled_changes(changes.len());
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.state_changed(&changes).await;
        }
        changes
    }
}
