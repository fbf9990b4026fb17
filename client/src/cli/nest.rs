mod commands;
mod utils;

use anyhow::Result;
use clap::Parser;
use clap::{Args, Subcommand};
use nest_sdm_client_rs::ThermostatMode;
use tracing_subscriber::EnvFilter;

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Off,
    Heat,
    Cool,
    Heatcool,
}

impl From<ModeArg> for ThermostatMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Off => ThermostatMode::Off,
            ModeArg::Heat => ThermostatMode::Heat,
            ModeArg::Cool => ThermostatMode::Cool,
            ModeArg::Heatcool => ThermostatMode::HeatCool,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// List the devices visible to the Device Access project
    List,
    /// Dump the traits of one device
    Info {
        #[arg(long)]
        name: String,
    },
    /// Change the thermostat mode
    SetMode {
        #[arg(long)]
        name: String,
        #[arg(long, value_enum)]
        mode: ModeArg,
    },
    /// Change the heating setpoint
    SetHeat {
        #[arg(long)]
        name: String,
        #[arg(long)]
        celsius: f64,
    },
    /// Change the cooling setpoint
    SetCool {
        #[arg(long)]
        name: String,
        #[arg(long)]
        celsius: f64,
    },
    /// Print device events from a Pub/Sub subscription
    Listen {
        /// Full subscription path or short id (needs --gcp-project-id)
        #[arg(long)]
        subscription: String,
        #[arg(long, env = "NEST_GCP_PROJECT_ID")]
        gcp_project_id: Option<String>,
        /// Service account key allowed to pull (default: the OAuth credentials)
        #[arg(long, env = "NEST_SERVICE_ACCOUNT_KEY")]
        service_account_key: Option<String>,
        /// Messages per pull
        #[arg(long, default_value_t = 10)]
        max_messages: u32,
    },
}

#[derive(Args, Debug, Clone)]
struct Credentials {
    /// Bearer token to use as-is
    #[arg(long, env = "NEST_ACCESS_TOKEN")]
    token: Option<String>,
    /// OAuth token file with a refresh token
    #[arg(long, env = "NEST_TOKEN_FILE")]
    token_file: Option<String>,
    #[arg(long, env = "NEST_CLIENT_ID")]
    client_id: Option<String>,
    #[arg(long, env = "NEST_CLIENT_SECRET")]
    client_secret: Option<String>,
}

#[derive(Parser, Debug)]
struct Params {
    /// Device Access project id
    #[arg(long, env = "NEST_PROJECT_ID")]
    project_id: String,
    #[command(flatten)]
    credentials: Credentials,
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let params = Params::parse();

    match params.command.clone() {
        Commands::List => commands::list_devices(&params).await?,
        Commands::Info { name } => commands::device_info(&params, &name).await?,
        Commands::SetMode { name, mode } => {
            commands::set_mode(&params, &name, mode.into()).await?
        }
        Commands::SetHeat { name, celsius } => {
            commands::set_heat(&params, &name, celsius).await?
        }
        Commands::SetCool { name, celsius } => {
            commands::set_cool(&params, &name, celsius).await?
        }
        Commands::Listen {
            subscription,
            gcp_project_id,
            service_account_key,
            max_messages,
        } => {
            commands::listen(
                &params,
                &subscription,
                gcp_project_id.as_deref(),
                service_account_key.as_deref(),
                max_messages,
            )
            .await?
        }
    }

    Ok(())
}
