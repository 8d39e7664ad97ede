//! GitHub implementation of the device authorization transport.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::{AccessToken, AuthClient, DeviceCode, PollResult, UserProfile};
use crate::errors::AuthError;

const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";

/// Scopes: basic profile plus email access for the enrichment step.
const SCOPES: &str = "read:user user:email";

const USER_AGENT: &str = "packsmith";
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Response from the token polling endpoint. Exactly one of `access_token`
/// or `error` is meaningful.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailEntry {
    email: String,
    primary: bool,
    verified: bool,
}

/// Device-flow client for GitHub. Endpoint URLs are injectable so tests can
/// point it at a local server.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    client_id: String,
    device_code_url: String,
    token_url: String,
    api_base: String,
}

impl GitHubClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_endpoints(
            client_id,
            GITHUB_DEVICE_CODE_URL,
            GITHUB_TOKEN_URL,
            GITHUB_API_URL,
        )
    }

    pub fn with_endpoints(
        client_id: impl Into<String>,
        device_code_url: impl Into<String>,
        token_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("reqwest client with static configuration");
        Self {
            http,
            client_id: client_id.into(),
            device_code_url: device_code_url.into(),
            token_url: token_url.into(),
            api_base: api_base.into(),
        }
    }

    async fn fetch_user(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
        let user: UserResponse = self
            .http
            .get(format!("{}/user", self.api_base))
            .bearer_auth(&token.token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("Failed to send user request to GitHub")
            .and_then(|resp| {
                resp.error_for_status()
                    .context("GitHub user endpoint returned error status")
            })
            .map_err(AuthError::Profile)?
            .json()
            .await
            .context("Failed to parse user response from GitHub")
            .map_err(AuthError::Profile)?;

        Ok(UserProfile {
            login: user.login,
            name: user.name,
            email: user.email,
        })
    }

    async fn fetch_primary_email(&self, token: &AccessToken) -> Result<Option<String>, AuthError> {
        let emails: Vec<EmailEntry> = self
            .http
            .get(format!("{}/user/emails", self.api_base))
            .bearer_auth(&token.token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("Failed to send email request to GitHub")
            .and_then(|resp| {
                resp.error_for_status()
                    .context("GitHub email endpoint returned error status")
            })
            .map_err(AuthError::Profile)?
            .json()
            .await
            .context("Failed to parse email response from GitHub")
            .map_err(AuthError::Profile)?;

        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

#[async_trait]
impl AuthClient for GitHubClient {
    async fn request_device_code(&self) -> Result<DeviceCode, AuthError> {
        let resp = self
            .http
            .post(&self.device_code_url)
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", SCOPES)])
            .send()
            .await
            .context("Failed to send device code request to GitHub")
            .map_err(AuthError::DeviceCode)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthError::DeviceCode(anyhow::anyhow!(
                "GitHub rejected the OAuth client id. Ensure GITHUB_CLIENT_ID names a GitHub \
                 OAuth App with device flow enabled"
            )));
        }

        resp.error_for_status()
            .context("GitHub device code endpoint returned error status")
            .map_err(AuthError::DeviceCode)?
            .json::<DeviceCode>()
            .await
            .context("Failed to parse device code response from GitHub")
            .map_err(AuthError::DeviceCode)
    }

    async fn poll_token(&self, device_code: &str) -> Result<PollResult, AuthError> {
        let resp: TokenResponse = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .context("Failed to send token poll request to GitHub")
            .map_err(AuthError::Exchange)?
            .json()
            .await
            .context("Failed to parse token poll response from GitHub")
            .map_err(AuthError::Exchange)?;

        if let Some(token) = resp.access_token {
            return Ok(PollResult::Authorized(AccessToken {
                token,
                token_type: resp.token_type.unwrap_or_else(|| "bearer".to_string()),
                scope: resp.scope.unwrap_or_default(),
            }));
        }

        match resp.error.as_deref() {
            Some("authorization_pending") => Ok(PollResult::Pending),
            Some("slow_down") => Ok(PollResult::SlowDown),
            Some("access_denied") => Err(AuthError::Denied),
            Some("expired_token") => Err(AuthError::Expired),
            Some(code) => Err(AuthError::Server {
                code: code.to_string(),
            }),
            None => Err(AuthError::Exchange(anyhow::anyhow!(
                "neither a token nor an error code in the response"
            ))),
        }
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
        let mut profile = self.fetch_user(token).await?;
        if let Some(email) = self.fetch_primary_email(token).await? {
            profile.email = Some(email);
        }
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_with_access_token() {
        let json = r#"{"access_token":"gho_abc123","token_type":"bearer","scope":"read:user"}"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token.as_deref(), Some("gho_abc123"));
        assert_eq!(resp.token_type.as_deref(), Some("bearer"));
        assert!(resp.error.is_none());
    }

    #[test]
    fn token_response_pending() {
        let json = r#"{"error":"authorization_pending"}"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert!(resp.access_token.is_none());
        assert_eq!(resp.error.as_deref(), Some("authorization_pending"));
    }

    #[test]
    fn device_code_response_deserialize() {
        let json = r#"{
            "device_code": "dc_abc123",
            "user_code": "ABCD-1234",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900,
            "interval": 5
        }"#;
        let code: DeviceCode = serde_json::from_str(json).unwrap();
        assert_eq!(code.device_code, "dc_abc123");
        assert_eq!(code.user_code, "ABCD-1234");
        assert_eq!(code.verification_uri, "https://github.com/login/device");
        assert_eq!(code.expires_in, 900);
        assert_eq!(code.interval, 5);
    }

    #[test]
    fn primary_verified_email_selection() {
        let json = r#"[
            {"email": "old@example.com", "primary": false, "verified": true},
            {"email": "unverified@example.com", "primary": true, "verified": false},
            {"email": "main@example.com", "primary": true, "verified": true}
        ]"#;
        let emails: Vec<EmailEntry> = serde_json::from_str(json).unwrap();
        let primary = emails.into_iter().find(|e| e.primary && e.verified);
        assert_eq!(primary.unwrap().email, "main@example.com");
    }
}
