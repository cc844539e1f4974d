//! In-memory provider and store used by the auth tests.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use shopgate_access::{
    AuthExchangeError, CredentialBundle, LoginTransaction, PermissionModel, ProviderIdentity,
    RouteTable,
};
use shopgate_core::{Result, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::AppState;
use super::provider::{AuthorizationRequest, IdentityProvider, ProviderError};
use super::store::{AccessStore, AccountRecord, Activity, NewAccount, StoreError};
use crate::config::{AccessConfig, SessionConfig};

/// App state over the given fakes, with default settings and the storefront
/// route table. Cookies are not marked Secure.
pub fn app_state(provider: Arc<FakeProvider>, store: Arc<MemoryStore>) -> Arc<AppState> {
    let session = SessionConfig {
        secure_cookies: false,
        ..SessionConfig::default()
    };
    Arc::new(AppState::new(
        provider,
        store,
        "https://shop.example.com/auth/callback".to_string(),
        &session,
        AccessConfig::new("https://shop.example.com/auth/login?logout=success".to_string()),
        RouteTable::storefront(),
    ))
}

/// An unsigned JWT whose payload carries only `exp`.
pub fn unsigned_jwt(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp.timestamp()));
    format!("{header}.{payload}.sig")
}

/// An unsigned id token carrying `nonce`.
pub fn id_token_with_nonce(nonce: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"nonce":"{nonce}"}}"#));
    format!("{header}.{payload}.sig")
}

pub fn bundle(access: &str, refresh: Option<&str>, lifetime_seconds: i64) -> CredentialBundle {
    CredentialBundle::new(
        access.to_string(),
        refresh.map(str::to_string),
        Some(format!("id-{access}")),
        Some(Utc::now() + Duration::seconds(lifetime_seconds)),
    )
}

pub fn identity(external_id: &str, email: &str) -> ProviderIdentity {
    ProviderIdentity {
        external_id: external_id.to_string(),
        email: Some(email.to_string()),
        first_name: Some("Ada".to_string()),
        last_name: None,
    }
}

pub fn storefront_model() -> PermissionModel {
    PermissionModel::new()
        .with_role(
            "customer",
            [
                "view_profile",
                "update_profile",
                "view_orders",
                "view_addresses",
                "manage_addresses",
                "manage_cart",
            ],
        )
        .with_role(
            "support",
            ["view_profile", "view_all_orders", "view_logs"],
        )
        .with_role(
            "admin",
            [
                "view_profile",
                "access_admin",
                "manage_users",
                "manage_roles",
                "view_all_orders",
            ],
        )
}

#[derive(Default)]
struct ProviderState {
    codes: HashMap<String, CredentialBundle>,
    identities: HashMap<String, ProviderIdentity>,
    refreshes: HashMap<String, CredentialBundle>,
}

/// Identity provider whose codes, tokens and refresh grants are configured
/// by the test. Codes and refresh tokens are single-use.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
    pub verify_calls: AtomicUsize,
    pub identity_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub offline: AtomicBool,
    refresh_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(&self, code: &str, tokens: CredentialBundle) {
        self.state
            .lock()
            .unwrap()
            .codes
            .insert(code.to_string(), tokens);
    }

    pub fn add_identity(&self, access_token: &str, identity: ProviderIdentity) {
        self.state
            .lock()
            .unwrap()
            .identities
            .insert(access_token.to_string(), identity);
    }

    pub fn add_refresh(&self, refresh_token: &str, tokens: CredentialBundle) {
        self.state
            .lock()
            .unwrap()
            .refreshes
            .insert(refresh_token.to_string(), tokens);
    }

    pub fn revoke(&self, access_token: &str) {
        self.state.lock().unwrap().identities.remove(access_token);
    }

    pub fn set_refresh_delay(&self, delay: std::time::Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_request(&self) -> AuthorizationRequest {
        AuthorizationRequest {
            url: "https://idp.example.com/oauth/authorize?state=state-1".to_string(),
            transaction: LoginTransaction {
                state: "state-1".to_string(),
                code_verifier: "verifier-1".to_string(),
                nonce: "nonce-1".to_string(),
            },
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        _redirect_uri: &str,
    ) -> std::result::Result<CredentialBundle, AuthExchangeError> {
        if code.is_empty() {
            return Err(AuthExchangeError::InvalidInput { field: "code" });
        }
        if code_verifier.is_empty() {
            return Err(AuthExchangeError::InvalidInput {
                field: "code_verifier",
            });
        }
        if self.is_offline() {
            return Err(AuthExchangeError::Transport {
                details: "connection refused".to_string(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .codes
            .remove(code)
            .ok_or(AuthExchangeError::Rejected {
                code: "invalid_grant".to_string(),
            })
    }

    async fn verify(&self, access_token: &str) -> bool {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        !self.is_offline()
            && self
                .state
                .lock()
                .unwrap()
                .identities
                .contains_key(access_token)
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> std::result::Result<Option<ProviderIdentity>, ProviderError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() {
            return Err(ProviderError::Transport {
                details: "connection refused".to_string(),
            });
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .identities
            .get(access_token)
            .cloned())
    }

    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<Option<CredentialBundle>, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_offline() {
            return Err(ProviderError::Transport {
                details: "connection refused".to_string(),
            });
        }
        Ok(self.state.lock().unwrap().refreshes.remove(refresh_token))
    }

    fn build_logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> Url {
        let mut url = Url::parse("https://idp.example.com/logout").unwrap();
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        url
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub user: UserId,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

#[derive(Default)]
struct StoreState {
    model: PermissionModel,
    default_role: Option<String>,
    accounts: Vec<AccountRecord>,
    issued: HashMap<String, IssuedToken>,
    activity: Vec<(UserId, Activity)>,
}

/// Access store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    pub fail_activity: AtomicBool,
    pub offline: AtomicBool,
}

impl MemoryStore {
    pub fn new(model: PermissionModel) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().model = model;
        store
    }

    pub fn set_default_role(&self, role: Option<&str>) {
        self.state.lock().unwrap().default_role = role.map(str::to_string);
    }

    pub fn insert_account(&self, account: AccountRecord) {
        self.state.lock().unwrap().accounts.push(account);
    }

    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.state.lock().unwrap().accounts.clone()
    }

    pub fn issued(&self, digest: &str) -> Option<IssuedToken> {
        self.state.lock().unwrap().issued.get(digest).cloned()
    }

    pub fn activity(&self) -> Vec<(UserId, Activity)> {
        self.state.lock().unwrap().activity.clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Database {
                details: "pool timed out".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

pub fn account(external_id: Option<&str>, email: &str, roles: &[&str]) -> AccountRecord {
    AccountRecord {
        id: UserId::new(),
        external_id: external_id.map(str::to_string),
        email: email.to_string(),
        first_name: None,
        last_name: None,
        active: true,
        last_login_at: None,
        roles: roles.iter().map(|r| (*r).to_string()).collect(),
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn load_permission_model(&self) -> Result<PermissionModel, StoreError> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().model.clone())
    }

    async fn default_role(&self) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().default_role.clone())
    }

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn create_account(
        &self,
        account: &NewAccount,
        role: &str,
    ) -> Result<AccountRecord, StoreError> {
        self.check_online()?;
        let record = AccountRecord {
            id: account.id,
            external_id: Some(account.external_id.clone()),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            active: true,
            last_login_at: None,
            roles: vec![role.to_string()],
        };
        self.state.lock().unwrap().accounts.push(record.clone());
        Ok(record)
    }

    async fn record_login(
        &self,
        id: UserId,
        external_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            account.last_login_at = Some(at);
            if account.external_id.is_none() {
                account.external_id = external_id.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn record_issued_token(
        &self,
        digest: &str,
        user: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        self.state
            .lock()
            .unwrap()
            .issued
            .entry(digest.to_string())
            .or_insert(IssuedToken {
                user,
                expires_at,
                revoked: false,
            });
        Ok(())
    }

    async fn revoke_token(
        &self,
        digest: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        match state.issued.get_mut(digest) {
            Some(issued) if !issued.revoked => {
                issued.revoked = true;
                Ok(Some(issued.user))
            }
            _ => Ok(None),
        }
    }

    async fn is_revoked(&self, digest: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .issued
            .get(digest)
            .is_some_and(|t| t.revoked))
    }

    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(StoreError::Database {
                details: "activity_log unavailable".to_string(),
            }
            .into());
        }
        self.state.lock().unwrap().activity.push((user, activity));
        Ok(())
    }
}
