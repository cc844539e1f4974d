//! Client for the external identity provider.
//!
//! All network contact with the provider goes through [`IdentityProvider`]:
//! - authorization-code exchange (PKCE)
//! - live token verification via a minimal identity query
//! - customer identity lookup
//! - refresh-token exchange
//! - end-session URL construction (no network)
//!
//! Token requests use the `oauth2` crate; the identity query is a GraphQL
//! POST sent with the raw access token in the `Authorization` header.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, StandardRevocableToken, StandardTokenResponse, TokenResponse,
    TokenUrl,
};
use reqwest::Url;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use shopgate_access::{
    AuthExchangeError, CredentialBundle, LoginTransaction, ProviderConfig, ProviderIdentity,
};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

const VERIFY_QUERY: &str = "query VerifyToken { customer { id } }";

const CUSTOMER_QUERY: &str =
    "query Customer { customer { id emailAddress { emailAddress } firstName lastName } }";

/// Provider operations the gate depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Builds the authorize URL and the PKCE transaction that must be stored
    /// until the callback.
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchanges an authorization code for a credential bundle.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CredentialBundle, AuthExchangeError>;

    /// Asks the provider whether the token still identifies a live session.
    /// Any non-success status or transport failure is `false`.
    async fn verify(&self, access_token: &str) -> bool;

    /// Fetches the customer identity behind a token. `Ok(None)` means the
    /// provider refused the token.
    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> Result<Option<ProviderIdentity>, ProviderError>;

    /// Exchanges a refresh token. `Ok(None)` means the provider refused it;
    /// transport failures are errors.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<CredentialBundle>, ProviderError>;

    /// Builds the end-session URL. Pure.
    fn build_logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> Url;
}

/// Authorize URL plus the transaction to carry to the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub transaction: LoginTransaction,
}

/// Errors talking to the provider outside of the code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// An endpoint URL in the configuration is invalid.
    Configuration { details: String },
    /// The provider could not be reached or timed out.
    Transport { details: String },
    /// The provider answered with something that could not be decoded.
    MalformedResponse { details: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => write!(f, "provider configuration: {details}"),
            Self::Transport { details } => write!(f, "provider unreachable: {details}"),
            Self::MalformedResponse { details } => {
                write!(f, "malformed provider response: {details}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Token response fields beyond the OAuth2 standard set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type ProviderTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type OAuthClient<HasAuthUrl = EndpointNotSet, HasTokenUrl = EndpointNotSet> = Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    HasTokenUrl,
>;

/// [`IdentityProvider`] backed by the configured OAuth2 endpoints.
pub struct IdentityProviderClient {
    http: reqwest::Client,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    identity_url: Url,
    logout_url: Url,
    scopes: Vec<String>,
}

impl IdentityProviderClient {
    /// Validates the configured endpoints and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if any URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self, Report<ProviderError>> {
        let invalid = |what: &str, e: &dyn fmt::Display| ProviderError::Configuration {
            details: format!("invalid {what}: {e}"),
        };

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| invalid("HTTP client", &e))?;

        Ok(Self {
            http,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: config
                .client_secret()
                .map(|s| ClientSecret::new(s.to_string())),
            auth_url: AuthUrl::new(config.authorize_url().to_string())
                .map_err(|e| invalid("authorize URL", &e))?,
            token_url: TokenUrl::new(config.token_url().to_string())
                .map_err(|e| invalid("token URL", &e))?,
            redirect_url: RedirectUrl::new(config.redirect_uri().to_string())
                .map_err(|e| invalid("redirect URI", &e))?,
            identity_url: Url::parse(config.identity_url())
                .map_err(|e| invalid("identity URL", &e))?,
            logout_url: Url::parse(config.logout_url())
                .map_err(|e| invalid("logout URL", &e))?,
            scopes: config.scopes().into_iter().map(str::to_string).collect(),
        })
    }

    fn token_client(
        &self,
        redirect_url: RedirectUrl,
    ) -> OAuthClient<EndpointNotSet, oauth2::EndpointSet> {
        let client = OAuthClient::new(self.client_id.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(redirect_url);
        match &self.client_secret {
            Some(secret) => client.set_client_secret(secret.clone()),
            None => client,
        }
    }

    async fn identity_query(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(self.identity_url.clone())
            .header(reqwest::header::AUTHORIZATION, access_token)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
    }

    fn bundle_from(response: &ProviderTokenResponse) -> CredentialBundle {
        let lifetime = response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS));
        CredentialBundle::new(
            response.access_token().secret().clone(),
            response.refresh_token().map(|t| t.secret().clone()),
            response.extra_fields().id_token.clone(),
            Some(Utc::now() + lifetime),
        )
    }
}

fn exchange_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> AuthExchangeError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => AuthExchangeError::Rejected {
            code: response.error().to_string(),
        },
        RequestTokenError::Request(e) => AuthExchangeError::Transport {
            details: e.to_string(),
        },
        RequestTokenError::Parse(e, _) => AuthExchangeError::MalformedResponse {
            details: e.to_string(),
        },
        RequestTokenError::Other(details) => AuthExchangeError::MalformedResponse { details },
    }
}

#[async_trait]
impl IdentityProvider for IdentityProviderClient {
    fn authorization_request(&self) -> AuthorizationRequest {
        let client = OAuthClient::new(self.client_id.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let nonce = CsrfToken::new_random();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("nonce", nonce.secret().clone());
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, state) = request.url();

        AuthorizationRequest {
            url: url.to_string(),
            transaction: LoginTransaction {
                state: state.secret().clone(),
                code_verifier: pkce_verifier.secret().clone(),
                nonce: nonce.secret().clone(),
            },
        }
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CredentialBundle, AuthExchangeError> {
        if code.is_empty() {
            return Err(AuthExchangeError::InvalidInput { field: "code" });
        }
        if code_verifier.is_empty() {
            return Err(AuthExchangeError::InvalidInput {
                field: "code_verifier",
            });
        }
        let redirect_url = RedirectUrl::new(redirect_uri.to_string()).map_err(|_| {
            AuthExchangeError::InvalidInput {
                field: "redirect_uri",
            }
        })?;

        let response = self
            .token_client(redirect_url)
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(exchange_error)?;

        debug!(
            has_refresh_token = response.refresh_token().is_some(),
            has_id_token = response.extra_fields().id_token.is_some(),
            "authorization code exchanged"
        );
        Ok(Self::bundle_from(&response))
    }

    #[instrument(skip_all)]
    async fn verify(&self, access_token: &str) -> bool {
        match self.identity_query(access_token, VERIFY_QUERY).await {
            Ok(response) => {
                let valid = response.status().is_success();
                debug!(status = %response.status(), valid, "live token verification");
                valid
            }
            Err(e) => {
                warn!(error = %e, "token verification request failed");
                false
            }
        }
    }

    #[instrument(skip_all)]
    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> Result<Option<ProviderIdentity>, ProviderError> {
        let response = self
            .identity_query(access_token, CUSTOMER_QUERY)
            .await
            .map_err(|e| ProviderError::Transport {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "identity query refused");
            return Ok(None);
        }

        let body: GraphqlResponse<CustomerData> =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    details: e.to_string(),
                })?;

        if !body.errors.is_empty() {
            warn!(errors = body.errors.len(), "identity query returned errors");
            return Ok(None);
        }

        Ok(body
            .data
            .and_then(|d| d.customer)
            .map(|customer| ProviderIdentity {
                external_id: customer.id,
                email: customer.email_address.and_then(|e| e.email_address),
                first_name: customer.first_name,
                last_name: customer.last_name,
            }))
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<Option<CredentialBundle>, ProviderError> {
        let result = self
            .token_client(self.redirect_url.clone())
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => Ok(Some(Self::bundle_from(&response))),
            Err(RequestTokenError::Request(e)) => Err(ProviderError::Transport {
                details: e.to_string(),
            }),
            Err(e) => {
                warn!(reason = %exchange_error(e), "refresh token refused");
                Ok(None)
            }
        }
    }

    fn build_logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> Url {
        let mut url = self.logout_url.clone();
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        url
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    customer: Option<CustomerNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerNode {
    id: String,
    email_address: Option<EmailAddress>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email_address: Option<String>,
}
