use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Deserialize;

use crate::config::Secret;
use crate::error::{SyncError, SyncResult};
use crate::ui::prelude::*;

use super::CloudEnvironment;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Credentials and HTTP client for one run.
///
/// Tokens are requested once per client and never refreshed; a run is far
/// shorter than a token lifetime.
#[derive(Debug)]
pub struct AzureSession {
    http: Client,
    cloud: CloudEnvironment,
    tenant_id: String,
    client_id: String,
    client_secret: Secret,
}

impl AzureSession {
    pub fn new(
        cloud: CloudEnvironment,
        tenant_id: &str,
        client_id: &str,
        client_secret: Secret,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("aad-users-to-linux/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            cloud,
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret,
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn cloud(&self) -> CloudEnvironment {
        self.cloud
    }

    /// Acquire an access token with the client credentials flow.
    pub fn access_token(&self, scope: &str, service: &'static str) -> SyncResult<String> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.cloud.login_endpoint(),
            self.tenant_id
        );
        emit(
            Level::Debug,
            "azure.token",
            &format!("Requesting token for {scope}"),
            None,
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .map_err(|e| SyncError::upstream(service, format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::upstream(service, token_error_message(response)));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| SyncError::upstream(service, format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }
}

fn token_error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    describe_token_error(status.as_u16(), &body)
}

fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenError>(body) {
        Ok(err) => format!(
            "token request failed with status {status}: {} {}",
            err.error,
            err.error_description.unwrap_or_default()
        )
        .trim_end()
        .to_string(),
        Err(_) => format!("token request failed with status {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_token_error() {
        let body = r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret."}"#;
        assert_eq!(
            describe_token_error(401, body),
            "token request failed with status 401: invalid_client AADSTS7000215: Invalid client secret."
        );
        assert_eq!(
            describe_token_error(502, "Bad Gateway"),
            "token request failed with status 502: Bad Gateway"
        );
    }

    #[test]
    fn test_session_debug_hides_secret() {
        let session = AzureSession::new(
            CloudEnvironment::Global,
            "tenant",
            "client",
            Secret::new("hunter2".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!format!("{session:?}").contains("hunter2"));
    }
}
