pub(crate) mod mapping;
pub(crate) mod thermostat;
