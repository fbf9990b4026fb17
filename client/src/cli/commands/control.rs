use anyhow::Result;
use nest_sdm_client_rs::{DeviceCommand, SdmClientTrait, ThermostatMode};

use crate::{Params, utils::create_client};

async fn execute(params: &Params, name: &str, command: DeviceCommand) -> Result<()> {
    let client = create_client(params)?;
    client.execute_command(name, &command).await?;
    println!("{} accepted", command.name());
    Ok(())
}

pub async fn set_mode(params: &Params, name: &str, mode: ThermostatMode) -> Result<()> {
    execute(params, name, DeviceCommand::SetMode(mode)).await
}

pub async fn set_heat(params: &Params, name: &str, celsius: f64) -> Result<()> {
    execute(params, name, DeviceCommand::SetHeat(celsius)).await
}

pub async fn set_cool(params: &Params, name: &str, celsius: f64) -> Result<()> {
    execute(params, name, DeviceCommand::SetCool(celsius)).await
}
