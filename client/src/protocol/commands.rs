use serde_json::{Value, json};

use crate::protocol::traits::ThermostatMode;

const SET_MODE: &str = "sdm.devices.commands.ThermostatMode.SetMode";
const SET_HEAT: &str = "sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat";
const SET_COOL: &str = "sdm.devices.commands.ThermostatTemperatureSetpoint.SetCool";
const SET_RANGE: &str = "sdm.devices.commands.ThermostatTemperatureSetpoint.SetRange";

/// Commands accepted by a thermostat's `executeCommand` endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    SetMode(ThermostatMode),
    SetHeat(f64),
    SetCool(f64),
    SetRange { heat: f64, cool: f64 },
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::SetMode(_) => SET_MODE,
            DeviceCommand::SetHeat(_) => SET_HEAT,
            DeviceCommand::SetCool(_) => SET_COOL,
            DeviceCommand::SetRange { .. } => SET_RANGE,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            DeviceCommand::SetMode(mode) => json!({ "mode": mode.as_str() }),
            DeviceCommand::SetHeat(heat) => json!({ "heatCelsius": heat }),
            DeviceCommand::SetCool(cool) => json!({ "coolCelsius": cool }),
            DeviceCommand::SetRange { heat, cool } => {
                json!({ "heatCelsius": heat, "coolCelsius": cool })
            }
        }
    }

    /// Request body for `executeCommand`.
    pub fn to_request(&self) -> Value {
        json!({
            "command": self.name(),
            "params": self.params(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_mode_request() {
        let request = DeviceCommand::SetMode(ThermostatMode::HeatCool).to_request();
        assert_eq!(
            request,
            json!({
                "command": "sdm.devices.commands.ThermostatMode.SetMode",
                "params": { "mode": "HEATCOOL" }
            })
        );
    }

    #[test]
    fn set_range_request() {
        let request = DeviceCommand::SetRange {
            heat: 18.5,
            cool: 23.5,
        }
        .to_request();
        assert_eq!(
            request["command"],
            "sdm.devices.commands.ThermostatTemperatureSetpoint.SetRange"
        );
        assert_eq!(request["params"]["heatCelsius"], 18.5);
        assert_eq!(request["params"]["coolCelsius"], 23.5);
    }

    #[test]
    fn single_setpoint_requests_carry_one_parameter() {
        let heat = DeviceCommand::SetHeat(20.0).params();
        assert_eq!(heat, json!({ "heatCelsius": 20.0 }));
        let cool = DeviceCommand::SetCool(25.0).params();
        assert_eq!(cool, json!({ "coolCelsius": 25.0 }));
    }
}
