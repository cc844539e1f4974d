//! Session and account orchestration on top of the identity provider.
//!
//! [`AuthService`] turns provider results into [`Session`]s backed by local
//! accounts. It never consults the verification cache; the gatekeeper
//! layers that on top.

use chrono::Utc;
use rootcause::prelude::Report;
use shopgate_access::{
    AccountResolutionError, AuthExchangeError, AuthenticationError, CredentialBundle, LocalUser,
    PermissionModel, ProviderIdentity, Session, jwt,
};
use shopgate_core::UserId;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::provider::{IdentityProvider, ProviderError};
use super::store::{AccessStore, AccountRecord, Activity, NewAccount, StoreError, token_digest};

fn store_failure(report: Report<StoreError>) -> AccountResolutionError {
    AccountResolutionError::Store {
        details: report.to_string(),
    }
}

fn provider_failure(err: ProviderError) -> AuthExchangeError {
    match err {
        ProviderError::Transport { details } => AuthExchangeError::Transport { details },
        ProviderError::Configuration { details } | ProviderError::MalformedResponse { details } => {
            AuthExchangeError::MalformedResponse { details }
        }
    }
}

fn local_user(account: &AccountRecord, model: &PermissionModel) -> LocalUser {
    LocalUser::from_parts(
        account.id,
        account.external_id.clone(),
        account.email.clone(),
        account.first_name.clone(),
        account.last_name.clone(),
        account.active,
        account.last_login_at,
        model.effective(account.roles.iter().map(String::as_str)),
    )
}

/// Authentication service shared by the gatekeeper and the auth routes.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn AccessStore>,
    redirect_uri: String,
    default_role: String,
}

impl AuthService {
    /// `default_role` is used for new accounts unless the store overrides it.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn AccessStore>,
        redirect_uri: String,
        default_role: String,
    ) -> Self {
        Self {
            provider,
            store,
            redirect_uri,
            default_role,
        }
    }

    /// Current role/permission model from the store.
    ///
    /// # Errors
    ///
    /// Returns `AccountResolutionError::Store` if the store is unavailable.
    pub async fn permission_model(&self) -> Result<PermissionModel, AccountResolutionError> {
        self.store
            .load_permission_model()
            .await
            .map_err(store_failure)
    }

    /// Completes a login: exchanges the code, resolves or creates the local
    /// account and stamps the login.
    ///
    /// A code the provider refuses leaves every local account untouched.
    ///
    /// # Errors
    ///
    /// - `AuthenticationError::Exchange` when the provider refuses the code
    ///   or cannot be reached
    /// - `AuthenticationError::AccountResolution` when the account cannot be
    ///   resolved; `DefaultRoleMissing` is a configuration error
    #[instrument(skip_all)]
    pub async fn authenticate_with_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Session, AuthenticationError> {
        let tokens = self
            .provider
            .exchange_code(code, code_verifier, &self.redirect_uri)
            .await?;

        let identity = self
            .provider
            .fetch_identity(tokens.access_token())
            .await
            .map_err(provider_failure)?
            .ok_or(AccountResolutionError::MissingIdentity)?;

        let model = self.permission_model().await?;
        let account = match self.find_account(&identity).await? {
            Some(account) => account,
            None => self.create_account(&identity, &model).await?,
        };
        if !account.active {
            info!(user_id = %account.id, "login refused for deactivated account");
            return Err(AccountResolutionError::Deactivated.into());
        }

        let now = Utc::now();
        let backfill = local_user(&account, &model)
            .external_id_backfill(&identity)
            .map(str::to_string);
        self.store
            .record_login(account.id, backfill.as_deref(), now)
            .await
            .map_err(store_failure)?;

        let account = AccountRecord {
            external_id: account.external_id.or(backfill),
            last_login_at: Some(now),
            ..account
        };
        self.record_issued(&tokens, account.id).await;
        self.record_activity(account.id, Activity::Login).await;

        info!(user_id = %account.id, "user authenticated");
        Ok(Session::new(local_user(&account, &model), tokens))
    }

    /// Resolves the session behind an access token with a live provider
    /// round-trip. Returns `None` when the token is revoked, refused by the
    /// provider, or maps to no active account.
    ///
    /// # Errors
    ///
    /// Returns `AccountResolution(Store)` when the store cannot answer.
    #[instrument(skip_all)]
    pub async fn get_session_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<Session>, AuthenticationError> {
        if self.is_revoked(access_token).await? {
            debug!("access token was revoked locally");
            return Ok(None);
        }

        let identity = match self.provider.fetch_identity(access_token).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "identity lookup failed; treating session as invalid");
                return Ok(None);
            }
        };

        let model = self.permission_model().await?;
        let Some(account) = self.find_account(&identity).await? else {
            warn!("verified token has no local account");
            return Ok(None);
        };
        if !account.active {
            return Ok(None);
        }

        let tokens = CredentialBundle::new(
            access_token.to_string(),
            None,
            None,
            jwt::expiry_claim(access_token),
        );
        Ok(Some(Session::new(local_user(&account, &model), tokens)))
    }

    /// Exchanges a refresh token for a new session. `Ok(None)` means the
    /// provider refused the token and the user must log in again.
    ///
    /// # Errors
    ///
    /// - `Exchange(Transport)` when the provider is unreachable
    /// - `AccountResolution(Store)` when the store cannot answer
    #[instrument(skip_all)]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, AuthenticationError> {
        let tokens = match self.provider.refresh(refresh_token).await {
            Ok(Some(tokens)) => tokens.or_refresh_token(refresh_token),
            Ok(None) => {
                debug!("provider refused refresh token");
                return Ok(None);
            }
            Err(e) => return Err(provider_failure(e).into()),
        };

        let identity = match self.provider.fetch_identity(tokens.access_token()).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!("refreshed token has no identity");
                return Ok(None);
            }
            Err(e) => return Err(provider_failure(e).into()),
        };

        let model = self.permission_model().await?;
        let Some(account) = self.find_account(&identity).await? else {
            warn!("refreshed identity has no local account");
            return Ok(None);
        };
        if !account.active {
            return Ok(None);
        }

        self.record_issued(&tokens, account.id).await;
        self.record_activity(account.id, Activity::Refresh).await;
        debug!(user_id = %account.id, "session refreshed");
        Ok(Some(Session::new(local_user(&account, &model), tokens)))
    }

    /// Revokes the token's local record. Never fails; the result says
    /// whether a record was found and marked.
    #[instrument(skip_all)]
    pub async fn logout(&self, access_token: &str) -> bool {
        match self
            .store
            .revoke_token(&token_digest(access_token), Utc::now())
            .await
        {
            Ok(Some(user)) => {
                self.record_activity(user, Activity::Logout).await;
                info!(user_id = %user, "session revoked");
                true
            }
            Ok(None) => {
                debug!("no issued-token record to revoke");
                false
            }
            Err(report) => {
                warn!(error = %report, "local revocation failed");
                false
            }
        }
    }

    /// Live verification: the token must not be revoked locally and the
    /// provider must accept it. Store failures count as invalid.
    #[instrument(skip_all)]
    pub async fn verify_access_token(&self, access_token: &str) -> bool {
        match self.is_revoked(access_token).await {
            Ok(true) => false,
            Ok(false) => self.provider.verify(access_token).await,
            Err(e) => {
                warn!(error = %e, "revocation lookup failed; failing closed");
                false
            }
        }
    }

    async fn is_revoked(&self, access_token: &str) -> Result<bool, AccountResolutionError> {
        self.store
            .is_revoked(&token_digest(access_token))
            .await
            .map_err(store_failure)
    }

    async fn find_account(
        &self,
        identity: &ProviderIdentity,
    ) -> Result<Option<AccountRecord>, AccountResolutionError> {
        if let Some(account) = self
            .store
            .find_account_by_external_id(&identity.external_id)
            .await
            .map_err(store_failure)?
        {
            return Ok(Some(account));
        }
        match identity.email.as_deref() {
            Some(email) => self
                .store
                .find_account_by_email(email)
                .await
                .map_err(store_failure),
            None => Ok(None),
        }
    }

    async fn create_account(
        &self,
        identity: &ProviderIdentity,
        model: &PermissionModel,
    ) -> Result<AccountRecord, AccountResolutionError> {
        let email = identity
            .email
            .clone()
            .ok_or(AccountResolutionError::MissingIdentity)?;

        let role = self
            .store
            .default_role()
            .await
            .map_err(store_failure)?
            .unwrap_or_else(|| self.default_role.clone());
        if !model.has_role(&role) {
            return Err(AccountResolutionError::DefaultRoleMissing { role });
        }

        let account = NewAccount {
            id: UserId::new(),
            external_id: identity.external_id.clone(),
            email,
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
        };
        let record = self
            .store
            .create_account(&account, &role)
            .await
            .map_err(store_failure)?;
        info!(user_id = %record.id, role = %role, "created account on first login");
        Ok(record)
    }

    async fn record_issued(&self, tokens: &CredentialBundle, user: UserId) {
        if let Err(report) = self
            .store
            .record_issued_token(
                &token_digest(tokens.access_token()),
                user,
                tokens.expires_at(),
            )
            .await
        {
            warn!(error = %report, user_id = %user, "failed to record issued token");
        }
    }

    async fn record_activity(&self, user: UserId, activity: Activity) {
        if let Err(report) = self.store.record_activity(user, activity, Utc::now()).await {
            warn!(
                error = %report,
                user_id = %user,
                action = activity.as_str(),
                "failed to write activity log"
            );
        }
    }
}
