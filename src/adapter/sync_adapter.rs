use jsonwebtoken::jwk::JwkSet;
use std::future::Future;
use tokio::runtime::{Builder, Runtime};

use super::AsyncKeycloakAdapter;
use crate::config::{AppConfig, KeycloakConfig};
use crate::models::{
    Introspection, NewUser, OidcConfiguration, Role, TokenClaims, TokenResponse, User, UserInfo, UserUpdate,
};
use crate::port::{AsyncKeycloakPort, KeycloakPort};
use crate::{KeycloakError, Result};

/// Blocking Keycloak adapter.
///
/// Drives an [`AsyncKeycloakAdapter`] on a private current-thread runtime, so
/// both share caches, retry and admin-token handling. Calling it from inside
/// an async runtime panics; async code should use the async adapter.
pub struct KeycloakAdapter {
    runtime: Runtime,
    inner: AsyncKeycloakAdapter,
}

impl KeycloakAdapter {
    pub fn new(config: KeycloakConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("kc-adapter")
            .build()
            .map_err(|e| KeycloakError::Runtime(format!("Failed to start runtime: {}", e)))?;
        let inner = AsyncKeycloakAdapter::new(config)?;

        Ok(Self { runtime, inner })
    }

    pub fn from_global() -> Result<Self> {
        Self::new(AppConfig::global()?.keycloak.clone())
    }

    pub fn config(&self) -> &KeycloakConfig {
        self.inner.config()
    }

    /// The async adapter this one drives.
    pub fn as_async(&self) -> &AsyncKeycloakAdapter {
        &self.inner
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

impl KeycloakPort for KeycloakAdapter {
    fn get_token(&self, username: &str, password: &str) -> Result<TokenResponse> {
        self.block_on(self.inner.get_token(username, password))
    }

    fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.block_on(self.inner.refresh_token(refresh_token))
    }

    fn get_token_from_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        self.block_on(self.inner.get_token_from_code(code, redirect_uri))
    }

    fn get_client_credentials_token(&self) -> Result<TokenResponse> {
        self.block_on(self.inner.get_client_credentials_token())
    }

    fn logout(&self, refresh_token: &str) -> Result<()> {
        self.block_on(self.inner.logout(refresh_token))
    }

    fn validate_token(&self, token: &str) -> bool {
        self.block_on(self.inner.validate_token(token))
    }

    fn get_userinfo(&self, token: &str) -> Result<UserInfo> {
        self.block_on(self.inner.get_userinfo(token))
    }

    fn get_token_info(&self, token: &str) -> Result<TokenClaims> {
        self.block_on(self.inner.get_token_info(token))
    }

    fn introspect_token(&self, token: &str) -> Result<Introspection> {
        self.block_on(self.inner.introspect_token(token))
    }

    fn get_public_key(&self) -> Result<String> {
        self.block_on(self.inner.get_public_key())
    }

    fn get_well_known_config(&self) -> Result<OidcConfiguration> {
        self.block_on(self.inner.get_well_known_config())
    }

    fn get_certs(&self) -> Result<JwkSet> {
        self.block_on(self.inner.get_certs())
    }

    fn has_role(&self, token: &str, role: &str) -> bool {
        self.block_on(self.inner.has_role(token, role))
    }

    fn has_any_role(&self, token: &str, roles: &[&str]) -> bool {
        self.block_on(self.inner.has_any_role(token, roles))
    }

    fn check_permissions(&self, token: &str, resource: &str, scope: &str) -> bool {
        self.block_on(self.inner.check_permissions(token, resource, scope))
    }

    fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.block_on(self.inner.get_user_by_id(user_id))
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.block_on(self.inner.get_user_by_username(username))
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.block_on(self.inner.get_user_by_email(email))
    }

    fn search_users(&self, query: &str, max_results: usize) -> Result<Vec<User>> {
        self.block_on(self.inner.search_users(query, max_results))
    }

    fn create_user(&self, user: &NewUser) -> Result<String> {
        self.block_on(self.inner.create_user(user))
    }

    fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<()> {
        self.block_on(self.inner.update_user(user_id, update))
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        self.block_on(self.inner.delete_user(user_id))
    }

    fn reset_password(&self, user_id: &str, password: &str, temporary: bool) -> Result<()> {
        self.block_on(self.inner.reset_password(user_id, password, temporary))
    }

    fn get_user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        self.block_on(self.inner.get_user_roles(user_id))
    }

    fn get_client_roles_for_user(&self, user_id: &str, client_id: &str) -> Result<Vec<Role>> {
        self.block_on(self.inner.get_client_roles_for_user(user_id, client_id))
    }

    fn assign_realm_role(&self, user_id: &str, role_name: &str) -> Result<()> {
        self.block_on(self.inner.assign_realm_role(user_id, role_name))
    }

    fn remove_realm_role(&self, user_id: &str, role_name: &str) -> Result<()> {
        self.block_on(self.inner.remove_realm_role(user_id, role_name))
    }

    fn assign_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()> {
        self.block_on(self.inner.assign_client_role(user_id, client_id, role_name))
    }

    fn remove_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()> {
        self.block_on(self.inner.remove_client_role(user_id, client_id, role_name))
    }

    fn create_realm_role(&self, role_name: &str, description: Option<&str>) -> Result<Role> {
        self.block_on(self.inner.create_realm_role(role_name, description))
    }

    fn delete_realm_role(&self, role_name: &str) -> Result<()> {
        self.block_on(self.inner.delete_realm_role(role_name))
    }

    fn get_realm_roles(&self) -> Result<Vec<Role>> {
        self.block_on(self.inner.get_realm_roles())
    }

    fn get_realm_role(&self, role_name: &str) -> Result<Role> {
        self.block_on(self.inner.get_realm_role(role_name))
    }

    fn get_service_account_id(&self) -> Result<String> {
        self.block_on(self.inner.get_service_account_id())
    }

    fn get_client_id(&self, client_name: &str) -> Result<String> {
        self.block_on(self.inner.get_client_id(client_name))
    }

    fn get_client_secret(&self, client_id: &str) -> Result<String> {
        self.block_on(self.inner.get_client_secret(client_id))
    }

    fn clear_user_sessions(&self, user_id: &str) -> Result<()> {
        self.block_on(self.inner.clear_user_sessions(user_id))
    }

    fn clear_all_caches(&self) {
        self.inner.clear_all_caches();
    }
}
