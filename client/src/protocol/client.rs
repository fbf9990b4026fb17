use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::auth::TokenProvider;
use crate::protocol::commands::DeviceCommand;
use crate::protocol::error::SdmClientError;
use crate::protocol::traits::{Device, ListDevicesResponse};

pub const SDM_BASE_URL: &str = "https://smartdevicemanagement.googleapis.com";

/// Upper bound on followed `nextPageToken`s in one listing.
const MAX_LIST_PAGES: usize = 50;

/// Remote operations the bridge needs from the Smart Device Management API.
#[async_trait]
pub trait SdmClientTrait: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, SdmClientError>;
    async fn get_device(&self, name: &str) -> Result<Device, SdmClientError>;
    async fn execute_command(
        &self,
        name: &str,
        command: &DeviceCommand,
    ) -> Result<(), SdmClientError>;
}

#[derive(Builder, Debug, Clone)]
pub struct SdmOptions {
    /// Device Access project id (the `enterprises/<id>` part).
    #[builder(setter(into))]
    pub project_id: String,
    #[builder(setter(into), default = "SDM_BASE_URL.to_string()")]
    pub base_url: String,
    #[builder(default = "Duration::from_secs(30)")]
    pub timeout: Duration,
}

impl SdmOptions {
    pub fn builder() -> SdmOptionsBuilder {
        SdmOptionsBuilder::default()
    }
}

#[derive(Clone)]
pub struct SdmClient {
    http: reqwest::Client,
    options: SdmOptions,
    tokens: Arc<dyn TokenProvider>,
}

impl SdmClient {
    pub fn new(
        options: SdmOptions,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SdmClientError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        Ok(Self {
            http,
            options,
            tokens,
        })
    }

    pub fn enterprise(&self) -> String {
        format!("enterprises/{}", self.options.project_id)
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.options.base_url.trim_end_matches('/'), resource)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SdmClientError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SdmClientError::Status { status, body });
        }
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }
}

#[async_trait]
impl SdmClientTrait for SdmClient {
    async fn list_devices(&self) -> Result<Vec<Device>, SdmClientError> {
        let url = self.url(&format!("{}/devices", self.enterprise()));
        let mut devices = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            debug!(page_token = ?page_token, "Listing devices at {url}");
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response: ListDevicesResponse = self.send(request).await?;
            devices.extend(response.devices);
            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if page_token.as_ref() != Some(&next) => page_token = Some(next),
                _ => return Ok(devices),
            }
        }

        warn!(
            found = devices.len(),
            "Device listing still paginated after {MAX_LIST_PAGES} pages, stopping"
        );
        Ok(devices)
    }

    async fn get_device(&self, name: &str) -> Result<Device, SdmClientError> {
        debug!("Fetching device {name}");
        self.send(self.http.get(self.url(name))).await
    }

    async fn execute_command(
        &self,
        name: &str,
        command: &DeviceCommand,
    ) -> Result<(), SdmClientError> {
        let url = self.url(&format!("{name}:executeCommand"));
        info!(
            device = name,
            command = command.name(),
            params = %command.params(),
            "Executing command"
        );
        let _: Value = self
            .send(self.http.post(url).json(&command.to_request()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::auth::StaticTokenProvider;
    use crate::protocol::traits::ThermostatMode;
    use reqwest::StatusCode;
    use wiremock::matchers::{
        body_json, header, method, path, query_param, query_param_is_missing,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEVICE: &str = "enterprises/project-id/devices/device-id";

    fn client(server: &MockServer) -> SdmClient {
        let options = SdmOptions::builder()
            .project_id("project-id")
            .base_url(server.uri())
            .build()
            .unwrap();
        SdmClient::new(options, Arc::new(StaticTokenProvider::new("token"))).unwrap()
    }

    #[tokio::test]
    async fn list_devices_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/enterprises/project-id/devices"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{
                    "name": DEVICE,
                    "type": "sdm.devices.types.THERMOSTAT",
                    "traits": {
                        "sdm.devices.traits.ThermostatMode": { "mode": "HEAT" }
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let devices = client(&server).list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, DEVICE);
        assert_eq!(devices[0].traits.thermostat_mode(), Some("HEAT"));
    }

    #[tokio::test]
    async fn empty_listing_yields_no_devices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/enterprises/project-id/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        assert!(client(&server).list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_devices_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/enterprises/project-id/devices"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{ "name": DEVICE }],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/enterprises/project-id/devices"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{ "name": "enterprises/project-id/devices/other" }],
                "nextPageToken": ""
            })))
            .expect(1)
            .mount(&server)
            .await;

        let devices = client(&server).list_devices().await.unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![DEVICE, "enterprises/project-id/devices/other"]);
    }

    #[tokio::test]
    async fn get_device_reads_traits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/{DEVICE}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": DEVICE,
                "traits": {
                    "sdm.devices.traits.Temperature": { "ambientTemperatureCelsius": 21.3 }
                }
            })))
            .mount(&server)
            .await;

        let device = client(&server).get_device(DEVICE).await.unwrap();
        assert_eq!(device.traits.ambient_celsius(), Some(21.3));
    }

    #[tokio::test]
    async fn execute_command_posts_command_and_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{DEVICE}:executeCommand")))
            .and(body_json(serde_json::json!({
                "command": "sdm.devices.commands.ThermostatMode.SetMode",
                "params": { "mode": "COOL" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .execute_command(DEVICE, &DeviceCommand::SetMode(ThermostatMode::Cool))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn api_errors_keep_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{DEVICE}:executeCommand")))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("Thermostat is in an invalid mode"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .execute_command(DEVICE, &DeviceCommand::SetHeat(21.0))
            .await
            .unwrap_err();
        match err {
            SdmClientError::Status { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid mode"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
