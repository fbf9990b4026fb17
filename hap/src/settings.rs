use std::path::{Path, PathBuf};
use std::time::Duration;

use nest_sdm_client_rs::subscription_path;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::backoff::BackoffPolicy;

/// Upper bound accepted for any configured backoff step.
const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Device Access project id.
    pub sdm_project_id: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    /// Token file written by the onboarding flow. Only carries the
    /// Device Access scope.
    pub oauth_token_path: PathBuf,
    /// Service account key (JSON) allowed to pull from the Pub/Sub subscription.
    pub service_account_key: PathBuf,
    /// `projects/<p>/subscriptions/<s>`, or a bare id combined with `gcp_project_id`.
    pub subscription: String,
    pub gcp_project_id: Option<String>,
    pub hub_name: String,
    pub pairing_code: [u8; 8],
    pub setup_id: Option<String>,
    pub port: u16,
    pub storage_path: PathBuf,
    pub web: WebSettings,
    pub bootstrap_backoff: BackoffPolicy,
    pub ingestion_backoff: BackoffPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sdm_project_id: String::new(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_token_path: PathBuf::from("token.json"),
            service_account_key: PathBuf::new(),
            subscription: String::new(),
            gcp_project_id: None,
            hub_name: String::from("Nest Hub"),
            pairing_code: [1, 1, 1, 2, 2, 3, 3, 3],
            setup_id: None,
            port: 32000,
            storage_path: PathBuf::from("data"),
            web: WebSettings::default(),
            bootstrap_backoff: BackoffPolicy::bootstrap(),
            ingestion_backoff: BackoffPolicy::ingestion(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sdm_project_id.is_empty() {
            return Err(SettingsError::Missing("sdm_project_id"));
        }
        if self.oauth_client_id.is_empty() {
            return Err(SettingsError::Missing("oauth_client_id"));
        }
        if self.oauth_client_secret.is_empty() {
            return Err(SettingsError::Missing("oauth_client_secret"));
        }
        if self.service_account_key.as_os_str().is_empty() {
            return Err(SettingsError::Missing("service_account_key"));
        }
        if self.subscription.is_empty() {
            return Err(SettingsError::Missing("subscription"));
        }
        if !self.subscription.starts_with("projects/") && self.gcp_project_id.is_none() {
            return Err(SettingsError::Invalid {
                field: "subscription",
                reason: "a bare subscription id needs `gcp_project_id`".to_string(),
            });
        }
        if self.pairing_code.iter().any(|d| *d > 9) {
            return Err(SettingsError::Invalid {
                field: "pairing_code",
                reason: "every entry must be a single digit".to_string(),
            });
        }
        if let Some(setup_id) = &self.setup_id {
            if setup_id.len() != 4 || !setup_id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(SettingsError::Invalid {
                    field: "setup_id",
                    reason: "must be 4 alphanumeric characters".to_string(),
                });
            }
        }
        for (field, policy) in [
            ("bootstrap_backoff", &self.bootstrap_backoff),
            ("ingestion_backoff", &self.ingestion_backoff),
        ] {
            if policy.initial.is_zero()
                || !policy.multiplier.is_finite()
                || policy.multiplier < 1.0
                || policy.max < policy.initial
                || policy.max > MAX_BACKOFF
            {
                return Err(SettingsError::Invalid {
                    field,
                    reason: format!(
                        "needs initial > 0, a finite multiplier >= 1 and initial <= max <= {}s",
                        MAX_BACKOFF.as_secs()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Fully qualified subscription path.
    pub fn subscription_path(&self) -> String {
        subscription_path(
            self.gcp_project_id.as_deref().unwrap_or_default(),
            &self.subscription,
        )
    }

    pub fn pairing_pin(&self) -> String {
        self.pairing_code.iter().map(|d| d.to_string()).collect()
    }
}
