use anyhow::Result;
use nest_sdm_client_rs::SdmClientTrait;

use crate::{Params, utils::create_client};

pub async fn list_devices(params: &Params) -> Result<()> {
    let client = create_client(params)?;
    let devices = client.list_devices().await?;
    println!("Found {} devices", devices.len());
    for device in devices {
        println!(
            "{} ({}) {}",
            device.name,
            device.device_type,
            device.traits.custom_name().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn device_info(params: &Params, name: &str) -> Result<()> {
    let client = create_client(params)?;
    let device = client.get_device(name).await?;
    println!("Device info: {}", serde_json::to_string_pretty(&device)?);
    Ok(())
}
