//! OAuth 2.0 token endpoint exchanges for Google and Microsoft.
//!
//! Only the token endpoint is used here: code exchange when a user links a
//! service and the refresh grant when a stored access token has expired.
//! The browser side of the authorization flow is owned by the API layer.

use crate::error::OAuthError;
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicRequestTokenError};
use oauth2::{
    AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use triggermenot_core::ServiceKind;

/// Google OAuth token URL.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Microsoft identity platform token URL, with `{tenant}` to substitute.
const MICROSOFT_TOKEN_URL_TEMPLATE: &str =
    "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";

/// Scopes re-requested on every Microsoft refresh grant.
const MICROSOFT_SCOPES: &[&str] = &[
    "email",
    "profile",
    "openid",
    "offline_access",
    "https://graph.microsoft.com/Mail.Read",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/User.Read",
];

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Google OAuth client settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
}

/// Microsoft OAuth client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MicrosoftOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

impl Default for MicrosoftOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_url: None,
            tenant: default_tenant(),
        }
    }
}

fn default_tenant() -> String {
    "common".to_string()
}

/// Tokens returned by a token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    /// Present when the provider issued (or rotated) a refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"<redacted>")
            .field("rotated", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Token endpoint client for one service.
#[derive(Clone)]
pub struct OAuthClient {
    service: ServiceKind,
    client_id: String,
    client_secret: String,
    token_url: String,
    redirect_url: Option<String>,
    refresh_scopes: &'static [&'static str],
    auth_type: AuthType,
}

impl OAuthClient {
    /// Creates the Google client.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when the client id or secret is missing.
    pub fn google(config: &GoogleOAuthConfig) -> Result<Self, Report<OAuthError>> {
        let service = ServiceKind::Google;
        let (client_id, client_secret) =
            required_pair(service, &config.client_id, &config.client_secret)?;

        Ok(Self {
            service,
            client_id,
            client_secret,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            redirect_url: config.redirect_url.clone(),
            refresh_scopes: &[],
            auth_type: AuthType::BasicAuth,
        })
    }

    /// Creates the Microsoft client for the configured tenant.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when the client id or secret is missing.
    pub fn microsoft(config: &MicrosoftOAuthConfig) -> Result<Self, Report<OAuthError>> {
        let service = ServiceKind::Microsoft;
        let (client_id, client_secret) =
            required_pair(service, &config.client_id, &config.client_secret)?;

        Ok(Self {
            service,
            client_id,
            client_secret,
            token_url: MICROSOFT_TOKEN_URL_TEMPLATE.replace("{tenant}", &config.tenant),
            redirect_url: config.redirect_url.clone(),
            refresh_scopes: MICROSOFT_SCOPES,
            auth_type: AuthType::RequestBody,
        })
    }

    /// Points the client at a different token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Returns the service this client talks to.
    #[must_use]
    pub fn service(&self) -> ServiceKind {
        self.service
    }

    fn token_client(&self) -> Result<TokenClient, OAuthError> {
        let token_url = TokenUrl::new(self.token_url.clone()).map_err(|e| {
            OAuthError::Configuration {
                reason: format!("invalid token URL: {e}"),
            }
        })?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_type(self.auth_type.clone())
            .set_token_uri(token_url);

        match &self.redirect_url {
            Some(url) => {
                let redirect = RedirectUrl::new(url.clone()).map_err(|e| {
                    OAuthError::Configuration {
                        reason: format!("invalid redirect URL: {e}"),
                    }
                })?;
                Ok(client.set_redirect_uri(redirect))
            }
            None => Ok(client),
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Called by the web layer that completes the service link redirect; the
    /// result goes to `TokenLifecycleManager::store_authorization`.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for OAuth error answers and `Transport` otherwise.
    #[instrument(skip_all, fields(service = %self.service))]
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<OAuthTokens, Report<OAuthError>> {
        let client = self.token_client()?;

        let mut request = client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let response = request
            .request_async(http)
            .await
            .map_err(|e| self.classify(e))?;

        debug!("authorization code exchanged");
        Ok(OAuthTokens {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in(),
        })
    }

    /// Runs the refresh grant.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` when the provider refuses the refresh token (for
    /// example `invalid_grant` after revocation) and `Transport` otherwise.
    #[instrument(skip_all, fields(service = %self.service))]
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<OAuthTokens, Report<OAuthError>> {
        let client = self.token_client()?;
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let mut request = client.exchange_refresh_token(&refresh_token);
        for scope in self.refresh_scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }

        let response = request
            .request_async(http)
            .await
            .map_err(|e| self.classify(e))?;

        debug!(rotated = response.refresh_token().is_some(), "access token refreshed");
        Ok(OAuthTokens {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in(),
        })
    }

    fn classify(
        &self,
        err: BasicRequestTokenError<oauth2::HttpClientError<reqwest::Error>>,
    ) -> OAuthError {
        match err {
            oauth2::RequestTokenError::ServerResponse(response) => OAuthError::Rejected {
                service: self.service,
                reason: response.to_string(),
            },
            other => OAuthError::Transport {
                service: self.service,
                reason: other.to_string(),
            },
        }
    }
}

fn required_pair(
    service: ServiceKind,
    client_id: &Option<String>,
    client_secret: &Option<String>,
) -> Result<(String, String), OAuthError> {
    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
            Ok((id.clone(), secret.clone()))
        }
        _ => Err(OAuthError::NotConfigured { service }),
    }
}

/// Service-specific refresh exchange used by the token lifecycle manager.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    async fn refresh(
        &self,
        service: ServiceKind,
        refresh_token: &str,
    ) -> Result<OAuthTokens, Report<OAuthError>>;
}

/// [`TokenRefresher`] backed by the configured [`OAuthClient`]s.
#[derive(Clone)]
pub struct OAuthRefresher {
    http: reqwest::Client,
    clients: HashMap<ServiceKind, OAuthClient>,
}

impl OAuthRefresher {
    /// Creates a refresher with no configured services.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            clients: HashMap::new(),
        }
    }

    /// Adds the client for its service, replacing any previous one.
    #[must_use]
    pub fn with_client(mut self, client: OAuthClient) -> Self {
        self.clients.insert(client.service(), client);
        self
    }

    /// Returns the client for a service, if configured.
    #[must_use]
    pub fn client(&self, service: ServiceKind) -> Option<&OAuthClient> {
        self.clients.get(&service)
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        service: ServiceKind,
        refresh_token: &str,
    ) -> Result<OAuthTokens, Report<OAuthError>> {
        let client = self
            .clients
            .get(&service)
            .ok_or(OAuthError::NotConfigured { service })?;
        client.refresh(&self.http, refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn microsoft_config() -> MicrosoftOAuthConfig {
        MicrosoftOAuthConfig {
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            ..MicrosoftOAuthConfig::default()
        }
    }

    #[test]
    fn missing_secret_is_not_configured() {
        let config = GoogleOAuthConfig {
            client_id: Some("client".to_string()),
            ..GoogleOAuthConfig::default()
        };
        let err = OAuthClient::google(&config).err().expect("should fail");
        assert_eq!(
            err.current_context(),
            &OAuthError::NotConfigured {
                service: ServiceKind::Google
            }
        );
    }

    #[test]
    fn microsoft_tenant_lands_in_token_url() {
        let config = MicrosoftOAuthConfig {
            tenant: "contoso".to_string(),
            ..microsoft_config()
        };
        let client = OAuthClient::microsoft(&config).expect("configured");
        assert_eq!(
            client.token_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn refresh_grant_returns_rotated_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "r2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::microsoft(&microsoft_config())
            .expect("configured")
            .with_token_url(format!("{}/token", server.uri()));

        let tokens = client
            .refresh(&reqwest::Client::new(), "r1")
            .await
            .expect("refresh should succeed");

        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));
        assert_eq!(tokens.expires_in, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn authorization_code_is_exchanged_with_pkce_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=c-123"))
            .and(body_string_contains("code_verifier=v-456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a1",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "r1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::google(&GoogleOAuthConfig {
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            redirect_url: Some("https://app.example/callback".to_string()),
        })
        .expect("configured")
        .with_token_url(format!("{}/token", server.uri()));

        let tokens = client
            .exchange_code(&reqwest::Client::new(), "c-123", Some("v-456"))
            .await
            .expect("exchange should succeed");

        assert_eq!(tokens.access_token, "a1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        assert_eq!(tokens.expires_in, Some(Duration::from_secs(3599)));
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked.",
            })))
            .mount(&server)
            .await;

        let refresher = OAuthRefresher::new(reqwest::Client::new()).with_client(
            OAuthClient::google(&GoogleOAuthConfig {
                client_id: Some("client".to_string()),
                client_secret: Some("secret".to_string()),
                redirect_url: None,
            })
            .expect("configured")
            .with_token_url(format!("{}/token", server.uri())),
        );

        let err = refresher
            .refresh(ServiceKind::Google, "revoked")
            .await
            .err()
            .expect("refresh should fail");

        match err.current_context() {
            OAuthError::Rejected { service, reason } => {
                assert_eq!(*service, ServiceKind::Google);
                assert!(reason.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_service_cannot_refresh() {
        let refresher = OAuthRefresher::new(reqwest::Client::new());
        let err = refresher
            .refresh(ServiceKind::Microsoft, "r1")
            .await
            .err()
            .expect("refresh should fail");
        assert!(matches!(
            err.current_context(),
            OAuthError::NotConfigured { .. }
        ));
    }
}
