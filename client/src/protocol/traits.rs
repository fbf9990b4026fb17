use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HVAC_TRAIT: &str = "sdm.devices.traits.ThermostatHvac";
pub const MODE_TRAIT: &str = "sdm.devices.traits.ThermostatMode";
pub const SETPOINT_TRAIT: &str = "sdm.devices.traits.ThermostatTemperatureSetpoint";
pub const TEMPERATURE_TRAIT: &str = "sdm.devices.traits.Temperature";
pub const SETTINGS_TRAIT: &str = "sdm.devices.traits.Settings";
pub const INFO_TRAIT: &str = "sdm.devices.traits.Info";

/// A string coming from the cloud API that is outside the known vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Partial trait bundle, as returned by a device fetch or carried by a push
/// update. Every trait and every attribute may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTraits {
    #[serde(rename = "sdm.devices.traits.ThermostatHvac", skip_serializing_if = "Option::is_none")]
    pub hvac: Option<HvacTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatMode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeTrait>,
    #[serde(
        rename = "sdm.devices.traits.ThermostatTemperatureSetpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub setpoint: Option<SetpointTrait>,
    #[serde(rename = "sdm.devices.traits.Temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<TemperatureTrait>,
    #[serde(rename = "sdm.devices.traits.Settings", skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsTrait>,
    #[serde(rename = "sdm.devices.traits.Info", skip_serializing_if = "Option::is_none")]
    pub info: Option<InfoTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvacTrait {
    #[serde(alias = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeTrait {
    #[serde(alias = "Mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetpointTrait {
    #[serde(alias = "HeatCelsius", skip_serializing_if = "Option::is_none")]
    pub heat_celsius: Option<f64>,
    #[serde(alias = "CoolCelsius", skip_serializing_if = "Option::is_none")]
    pub cool_celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemperatureTrait {
    #[serde(alias = "AmbientTemperatureCelsius", skip_serializing_if = "Option::is_none")]
    pub ambient_temperature_celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsTrait {
    #[serde(alias = "TemperatureScale", skip_serializing_if = "Option::is_none")]
    pub temperature_scale: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InfoTrait {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

impl DeviceTraits {
    pub fn hvac_status(&self) -> Option<&str> {
        self.hvac.as_ref()?.status.as_deref()
    }

    pub fn thermostat_mode(&self) -> Option<&str> {
        self.mode.as_ref()?.mode.as_deref()
    }

    pub fn heat_celsius(&self) -> Option<f64> {
        self.setpoint.as_ref()?.heat_celsius
    }

    pub fn cool_celsius(&self) -> Option<f64> {
        self.setpoint.as_ref()?.cool_celsius
    }

    pub fn ambient_celsius(&self) -> Option<f64> {
        self.temperature.as_ref()?.ambient_temperature_celsius
    }

    pub fn temperature_scale(&self) -> Option<&str> {
        self.settings.as_ref()?.temperature_scale.as_deref()
    }

    pub fn custom_name(&self) -> Option<&str> {
        self.info
            .as_ref()?
            .custom_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub traits: DeviceTraits,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDevicesResponse {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(
        rename = "nextPageToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_page_token: Option<String>,
}

/// Operating mode requested by the user (`ThermostatMode.mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    Off,
    Heat,
    Cool,
    HeatCool,
}

impl ThermostatMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ThermostatMode::Off => "OFF",
            ThermostatMode::Heat => "HEAT",
            ThermostatMode::Cool => "COOL",
            ThermostatMode::HeatCool => "HEATCOOL",
        }
    }
}

impl FromStr for ThermostatMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(ThermostatMode::Off),
            "HEAT" => Ok(ThermostatMode::Heat),
            "COOL" => Ok(ThermostatMode::Cool),
            "HEATCOOL" => Ok(ThermostatMode::HeatCool),
            _ => Err(UnknownVariant {
                kind: "thermostat mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ThermostatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live operating status reported by the device (`ThermostatHvac.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HvacStatus {
    Off,
    Heating,
    Cooling,
}

impl HvacStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            HvacStatus::Off => "OFF",
            HvacStatus::Heating => "HEATING",
            HvacStatus::Cooling => "COOLING",
        }
    }
}

impl FromStr for HvacStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(HvacStatus::Off),
            "HEATING" => Ok(HvacStatus::Heating),
            "COOLING" => Ok(HvacStatus::Cooling),
            _ => Err(UnknownVariant {
                kind: "hvac status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for HvacStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display unit configured on the device (`Settings.temperatureScale`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureScale {
    Celsius,
    Fahrenheit,
}

impl TemperatureScale {
    pub const fn as_str(self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "CELSIUS",
            TemperatureScale::Fahrenheit => "FAHRENHEIT",
        }
    }
}

impl FromStr for TemperatureScale {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CELSIUS" => Ok(TemperatureScale::Celsius),
            "FAHRENHEIT" => Ok(TemperatureScale::Fahrenheit),
            _ => Err(UnknownVariant {
                kind: "temperature scale",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TemperatureScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
