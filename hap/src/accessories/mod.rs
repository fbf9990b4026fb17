pub(crate) mod state;
mod thermostat;

pub(crate) use thermostat::NestThermostatAccessory;
