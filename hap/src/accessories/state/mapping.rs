//! Translation between the cloud vocabulary and HomeKit characteristic codes.
//!
//! Every mapping is a closed set. A value outside of it is reported as an
//! [`InvariantViolation`] and is never replaced by a default: it means either
//! the cloud API changed its contract or a caller sent a code HomeKit does not
//! define.

use std::str::FromStr;

use nest_sdm_client_rs::{HvacStatus, TemperatureScale, ThermostatMode, UnknownVariant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("invariant violation: {kind} code {code} is not defined")]
    UnknownLocalCode { kind: &'static str, code: u8 },
    #[error("invariant violation: {0}")]
    UnknownCloudValue(#[from] UnknownVariant),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum TargetHeatingCoolingState {
    #[default]
    Off = 0,
    Heat = 1,
    Cool = 2,
    Auto = 3,
}

impl TryFrom<u8> for TargetHeatingCoolingState {
    type Error = InvariantViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TargetHeatingCoolingState::Off),
            1 => Ok(TargetHeatingCoolingState::Heat),
            2 => Ok(TargetHeatingCoolingState::Cool),
            3 => Ok(TargetHeatingCoolingState::Auto),
            code => Err(InvariantViolation::UnknownLocalCode {
                kind: "target heating cooling state",
                code,
            }),
        }
    }
}

impl From<TargetHeatingCoolingState> for u8 {
    fn from(value: TargetHeatingCoolingState) -> Self {
        value as u8
    }
}

impl From<ThermostatMode> for TargetHeatingCoolingState {
    fn from(mode: ThermostatMode) -> Self {
        match mode {
            ThermostatMode::Off => TargetHeatingCoolingState::Off,
            ThermostatMode::Heat => TargetHeatingCoolingState::Heat,
            ThermostatMode::Cool => TargetHeatingCoolingState::Cool,
            ThermostatMode::HeatCool => TargetHeatingCoolingState::Auto,
        }
    }
}

impl From<TargetHeatingCoolingState> for ThermostatMode {
    fn from(state: TargetHeatingCoolingState) -> Self {
        match state {
            TargetHeatingCoolingState::Off => ThermostatMode::Off,
            TargetHeatingCoolingState::Heat => ThermostatMode::Heat,
            TargetHeatingCoolingState::Cool => ThermostatMode::Cool,
            TargetHeatingCoolingState::Auto => ThermostatMode::HeatCool,
        }
    }
}

/// HomeKit has no "auto" current state, the device is either idle or running.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum CurrentHeatingCoolingState {
    #[default]
    Off = 0,
    Heat = 1,
    Cool = 2,
}

impl TryFrom<u8> for CurrentHeatingCoolingState {
    type Error = InvariantViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CurrentHeatingCoolingState::Off),
            1 => Ok(CurrentHeatingCoolingState::Heat),
            2 => Ok(CurrentHeatingCoolingState::Cool),
            code => Err(InvariantViolation::UnknownLocalCode {
                kind: "current heating cooling state",
                code,
            }),
        }
    }
}

impl From<CurrentHeatingCoolingState> for u8 {
    fn from(value: CurrentHeatingCoolingState) -> Self {
        value as u8
    }
}

impl From<HvacStatus> for CurrentHeatingCoolingState {
    fn from(status: HvacStatus) -> Self {
        match status {
            HvacStatus::Off => CurrentHeatingCoolingState::Off,
            HvacStatus::Heating => CurrentHeatingCoolingState::Heat,
            HvacStatus::Cooling => CurrentHeatingCoolingState::Cool,
        }
    }
}

impl From<CurrentHeatingCoolingState> for HvacStatus {
    fn from(state: CurrentHeatingCoolingState) -> Self {
        match state {
            CurrentHeatingCoolingState::Off => HvacStatus::Off,
            CurrentHeatingCoolingState::Heat => HvacStatus::Heating,
            CurrentHeatingCoolingState::Cool => HvacStatus::Cooling,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum TemperatureDisplayUnits {
    #[default]
    Celsius = 0,
    Fahrenheit = 1,
}

impl TryFrom<u8> for TemperatureDisplayUnits {
    type Error = InvariantViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TemperatureDisplayUnits::Celsius),
            1 => Ok(TemperatureDisplayUnits::Fahrenheit),
            code => Err(InvariantViolation::UnknownLocalCode {
                kind: "temperature display units",
                code,
            }),
        }
    }
}

impl From<TemperatureDisplayUnits> for u8 {
    fn from(value: TemperatureDisplayUnits) -> Self {
        value as u8
    }
}

impl From<TemperatureScale> for TemperatureDisplayUnits {
    fn from(scale: TemperatureScale) -> Self {
        match scale {
            TemperatureScale::Celsius => TemperatureDisplayUnits::Celsius,
            TemperatureScale::Fahrenheit => TemperatureDisplayUnits::Fahrenheit,
        }
    }
}

impl From<TemperatureDisplayUnits> for TemperatureScale {
    fn from(units: TemperatureDisplayUnits) -> Self {
        match units {
            TemperatureDisplayUnits::Celsius => TemperatureScale::Celsius,
            TemperatureDisplayUnits::Fahrenheit => TemperatureScale::Fahrenheit,
        }
    }
}

pub fn target_mode_from_code(code: u8) -> Result<ThermostatMode, InvariantViolation> {
    TargetHeatingCoolingState::try_from(code).map(ThermostatMode::from)
}

pub fn target_mode_to_code(mode: ThermostatMode) -> u8 {
    TargetHeatingCoolingState::from(mode).into()
}

pub fn current_mode_from_code(code: u8) -> Result<HvacStatus, InvariantViolation> {
    CurrentHeatingCoolingState::try_from(code).map(HvacStatus::from)
}

pub fn current_mode_to_code(status: HvacStatus) -> u8 {
    CurrentHeatingCoolingState::from(status).into()
}

pub fn display_unit_from_code(code: u8) -> Result<TemperatureScale, InvariantViolation> {
    TemperatureDisplayUnits::try_from(code).map(TemperatureScale::from)
}

pub fn display_unit_to_code(scale: TemperatureScale) -> u8 {
    TemperatureDisplayUnits::from(scale).into()
}

/// Parses a cloud string, reporting unknown values as invariant violations.
pub fn parse_cloud<T>(value: &str) -> Result<T, InvariantViolation>
where
    T: FromStr<Err = UnknownVariant>,
{
    Ok(value.parse::<T>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_mode_codes_round_trip() {
        assert_eq!(target_mode_from_code(0).unwrap().as_str(), "OFF");
        assert_eq!(target_mode_from_code(1).unwrap().as_str(), "HEAT");
        assert_eq!(target_mode_from_code(2).unwrap().as_str(), "COOL");
        assert_eq!(target_mode_from_code(3).unwrap().as_str(), "HEATCOOL");
        assert_eq!(target_mode_to_code(ThermostatMode::HeatCool), 3);
        assert_eq!(target_mode_to_code(ThermostatMode::Off), 0);
    }

    #[test]
    fn out_of_range_target_mode_is_an_invariant_violation() {
        let err = target_mode_from_code(4).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::UnknownLocalCode {
                kind: "target heating cooling state",
                code: 4
            }
        );
    }

    #[test]
    fn current_status_has_no_auto_code() {
        assert_eq!(current_mode_to_code(HvacStatus::Off), 0);
        assert_eq!(current_mode_to_code(HvacStatus::Heating), 1);
        assert_eq!(current_mode_to_code(HvacStatus::Cooling), 2);
        assert_eq!(current_mode_from_code(2), Ok(HvacStatus::Cooling));
        assert!(current_mode_from_code(3).is_err());
    }

    #[test]
    fn display_units_map_both_ways() {
        assert_eq!(display_unit_to_code(TemperatureScale::Celsius), 0);
        assert_eq!(display_unit_to_code(TemperatureScale::Fahrenheit), 1);
        assert_eq!(display_unit_from_code(1), Ok(TemperatureScale::Fahrenheit));
        assert!(display_unit_from_code(2).is_err());
    }

    #[test]
    fn unknown_cloud_strings_are_invariant_violations() {
        assert_eq!(parse_cloud::<ThermostatMode>("HEAT"), Ok(ThermostatMode::Heat));
        let err = parse_cloud::<ThermostatMode>("MANUAL_ECO").unwrap_err();
        assert!(matches!(err, InvariantViolation::UnknownCloudValue(_)));
        assert!(err.to_string().contains("MANUAL_ECO"));
        assert!(parse_cloud::<HvacStatus>("FAN").is_err());
        assert!(parse_cloud::<TemperatureScale>("").is_err());
    }
}
