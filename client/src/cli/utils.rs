use std::sync::Arc;

use anyhow::{Context, Result, bail};
use nest_sdm_client_rs::{
    OAuthToken, OAuthTokenProvider, SdmClient, SdmOptions, StaticTokenProvider, TokenProvider,
};

use crate::{Credentials, Params};

pub fn token_provider(credentials: &Credentials) -> Result<Arc<dyn TokenProvider>> {
    if let Some(token) = &credentials.token {
        return Ok(Arc::new(StaticTokenProvider::new(token.clone())));
    }
    let (Some(path), Some(client_id), Some(client_secret)) = (
        &credentials.token_file,
        &credentials.client_id,
        &credentials.client_secret,
    ) else {
        bail!("either --token or --token-file with --client-id and --client-secret is required");
    };
    let token = OAuthToken::from_file(path)
        .with_context(|| format!("Failed to load OAuth token from {path}"))?;
    Ok(Arc::new(OAuthTokenProvider::new(
        client_id.clone(),
        client_secret.clone(),
        token,
    )))
}

pub fn create_client(params: &Params) -> Result<SdmClient> {
    let options = SdmOptions::builder()
        .project_id(params.project_id.clone())
        .build()?;
    Ok(SdmClient::new(options, token_provider(&params.credentials)?)?)
}
