mod accessories;
mod bridge;
mod device;
mod logging;
mod settings;
mod web;

pub use bridge::start_bridge;

use anyhow::{Context, Result};
use clap::Parser;
use clap_derive::Parser;
use logging::{LogConfig, RotationPeriod, setup_logging};
use settings::Settings;
use tracing::info;

#[derive(Parser, Debug)]
pub struct Params {
    /// Settings file (JSON) with the Device Access and Pub/Sub configuration
    #[clap(long)]
    settings: String,
    /// Directory for rolling log files (if not set, logs to stdout)
    #[clap(long)]
    log_dir: Option<String>,
    /// Log rotation period: minutely, hourly, daily or never
    #[clap(long, default_value = "daily")]
    log_rotation: RotationPeriod,
    /// Number of rotated log files to keep (0 = unlimited)
    #[clap(long, default_value = "7")]
    max_log_files: usize,
    /// Also log to stdout when writing to files
    #[clap(long)]
    log_console: bool,
}

impl Params {
    fn log_config(&self) -> Option<LogConfig> {
        self.log_dir.as_ref().map(|log_dir| LogConfig {
            log_dir: log_dir.clone(),
            rotation: self.log_rotation,
            max_log_files: self.max_log_files,
            console: self.log_console,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();

    let _log_guard = setup_logging(params.log_config()).context("Failed to set up logging")?;

    let settings = Settings::load(&params.settings)
        .with_context(|| format!("Failed to load settings from {}", params.settings))?;
    info!(
        "Starting {} for Device Access project {}",
        settings.hub_name, settings.sdm_project_id
    );

    start_bridge(settings).await
}
