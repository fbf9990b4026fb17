use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::protocol::error::SdmClientError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Refresh this long before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, SdmClientError>;
}

/// Always hands out the same bearer token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, SdmClientError> {
        Ok(self.token.clone())
    }
}

/// OAuth2 token as persisted by the onboarding flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SdmClientError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Keeps an access token valid by running the refresh-token grant when needed.
pub struct OAuthTokenProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    token: Mutex<OAuthToken>,
}

impl OAuthTokenProvider {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token: OAuthToken,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            token: Mutex::new(token),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    async fn refresh(&self, token: &mut OAuthToken) -> Result<(), SdmClientError> {
        if token.refresh_token.is_empty() {
            return Err(SdmClientError::Auth(
                "access token expired and no refresh token is available".to_string(),
            ));
        }
        debug!("Refreshing OAuth access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SdmClientError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let refreshed: RefreshResponse = serde_json::from_str(&body)?;
        token.access_token = refreshed.access_token;
        if let Some(token_type) = refreshed.token_type {
            token.token_type = token_type;
        }
        token.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        info!(expiry = ?token.expiry, "OAuth access token refreshed");
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, SdmClientError> {
        let mut token = self.token.lock().await;
        if !token.is_fresh(Utc::now()) {
            self.refresh(&mut token).await?;
        }
        Ok(token.access_token.clone())
    }
}

/// Tokens minted from a service account key. The user OAuth token only
/// carries the Device Access scope, so Pub/Sub pulls authenticate this way.
pub struct ServiceAccountTokenProvider {
    account: gcp_auth::CustomServiceAccount,
    scopes: Vec<String>,
}

impl ServiceAccountTokenProvider {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SdmClientError> {
        let path = path.as_ref();
        let account = gcp_auth::CustomServiceAccount::from_file(path).map_err(|e| {
            SdmClientError::Auth(format!(
                "cannot load service account key {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            account,
            scopes: vec![PUBSUB_SCOPE.to_string()],
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String, SdmClientError> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        // gcp_auth caches the token per scope set until it expires
        let token = gcp_auth::TokenProvider::token(&self.account, &scopes)
            .await
            .map_err(|e| SdmClientError::Auth(format!("service account token: {e}")))?;
        Ok(token.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn token_freshness_honours_margin() {
        let now = Utc::now();
        let token = OAuthToken {
            access_token: "abc".into(),
            expiry: Some(now + Duration::seconds(30)),
            ..Default::default()
        };
        assert!(!token.is_fresh(now));

        let token = OAuthToken {
            access_token: "abc".into(),
            expiry: Some(now + Duration::seconds(600)),
            ..Default::default()
        };
        assert!(token.is_fresh(now));

        assert!(!OAuthToken::default().is_fresh(now));
    }

    #[test]
    fn load_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"access_token":"ya29.a","token_type":"Bearer","refresh_token":"1//r","expiry":"2024-01-01T12:00:00Z"}"#,
        )
        .unwrap();
        let token = OAuthToken::from_file(&path).unwrap();
        assert_eq!(token.access_token, "ya29.a");
        assert_eq!(token.refresh_token, "1//r");
        assert!(token.expiry.is_some());
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OAuthTokenProvider::new(
            "client",
            "secret",
            OAuthToken {
                access_token: "stale".into(),
                refresh_token: "refresh".into(),
                expiry: Some(Utc::now() - Duration::seconds(10)),
                ..Default::default()
            },
        )
        .with_token_url(format!("{}/token", server.uri()));

        assert_eq!(provider.access_token().await.unwrap(), "fresh-token");
        assert_eq!(provider.access_token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn refresh_failure_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let provider = OAuthTokenProvider::new(
            "client",
            "secret",
            OAuthToken {
                refresh_token: "revoked".into(),
                ..Default::default()
            },
        )
        .with_token_url(format!("{}/token", server.uri()));

        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, SdmClientError::Auth(_)));
    }

    #[test]
    fn service_account_key_must_exist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ServiceAccountTokenProvider::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(SdmClientError::Auth(_))));

        let path = dir.path().join("key.json");
        std::fs::write(&path, r#"{"type": "service_account"}"#).unwrap();
        assert!(matches!(
            ServiceAccountTokenProvider::from_file(&path),
            Err(SdmClientError::Auth(_))
        ));
    }
}
