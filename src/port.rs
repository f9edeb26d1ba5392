//! The two faces of the Keycloak adapter: an async port for services running
//! on Tokio and a blocking port for everything else. Both expose the same
//! operations with the same protocol semantics.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;

use crate::models::{
    Introspection, NewUser, OidcConfiguration, Role, TokenClaims, TokenResponse, User, UserInfo, UserUpdate,
};
use crate::Result;

#[async_trait]
pub trait AsyncKeycloakPort: Send + Sync {
    /// Resource-owner password grant. Prefer the authorization code flow for
    /// interactive logins; this is meant for tests and trusted tooling.
    async fn get_token(&self, username: &str, password: &str) -> Result<TokenResponse>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
    async fn get_token_from_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse>;
    async fn get_client_credentials_token(&self) -> Result<TokenResponse>;
    /// End the session the refresh token belongs to.
    async fn logout(&self, refresh_token: &str) -> Result<()>;
    /// Signature and expiry check against the realm keys. Never errors.
    async fn validate_token(&self, token: &str) -> bool;
    async fn get_userinfo(&self, token: &str) -> Result<UserInfo>;
    async fn get_token_info(&self, token: &str) -> Result<TokenClaims>;
    async fn introspect_token(&self, token: &str) -> Result<Introspection>;
    /// Realm signing key as a PEM `PUBLIC KEY` block.
    async fn get_public_key(&self) -> Result<String>;
    async fn get_well_known_config(&self) -> Result<OidcConfiguration>;
    async fn get_certs(&self) -> Result<JwkSet>;

    async fn has_role(&self, token: &str, role: &str) -> bool;
    async fn has_any_role(&self, token: &str, roles: &[&str]) -> bool;
    /// UMA check of `resource#scope` for the token's subject.
    async fn check_permissions(&self, token: &str, resource: &str, scope: &str) -> bool;

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn search_users(&self, query: &str, max_results: usize) -> Result<Vec<User>>;
    async fn create_user(&self, user: &NewUser) -> Result<String>;
    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<()>;
    async fn delete_user(&self, user_id: &str) -> Result<()>;
    async fn reset_password(&self, user_id: &str, password: &str, temporary: bool) -> Result<()>;
    async fn get_user_roles(&self, user_id: &str) -> Result<Vec<Role>>;
    async fn get_client_roles_for_user(&self, user_id: &str, client_id: &str) -> Result<Vec<Role>>;
    async fn assign_realm_role(&self, user_id: &str, role_name: &str) -> Result<()>;
    async fn remove_realm_role(&self, user_id: &str, role_name: &str) -> Result<()>;
    async fn assign_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()>;
    async fn remove_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()>;
    async fn create_realm_role(&self, role_name: &str, description: Option<&str>) -> Result<Role>;
    async fn delete_realm_role(&self, role_name: &str) -> Result<()>;
    async fn get_realm_roles(&self) -> Result<Vec<Role>>;
    async fn get_realm_role(&self, role_name: &str) -> Result<Role>;
    async fn get_service_account_id(&self) -> Result<String>;
    /// Internal id of the client whose `clientId` is `client_name`.
    async fn get_client_id(&self, client_name: &str) -> Result<String>;
    async fn get_client_secret(&self, client_id: &str) -> Result<String>;
    async fn clear_user_sessions(&self, user_id: &str) -> Result<()>;

    fn clear_all_caches(&self);
}

pub trait KeycloakPort {
    fn get_token(&self, username: &str, password: &str) -> Result<TokenResponse>;
    fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
    fn get_token_from_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse>;
    fn get_client_credentials_token(&self) -> Result<TokenResponse>;
    fn logout(&self, refresh_token: &str) -> Result<()>;
    fn validate_token(&self, token: &str) -> bool;
    fn get_userinfo(&self, token: &str) -> Result<UserInfo>;
    fn get_token_info(&self, token: &str) -> Result<TokenClaims>;
    fn introspect_token(&self, token: &str) -> Result<Introspection>;
    fn get_public_key(&self) -> Result<String>;
    fn get_well_known_config(&self) -> Result<OidcConfiguration>;
    fn get_certs(&self) -> Result<JwkSet>;

    fn has_role(&self, token: &str, role: &str) -> bool;
    fn has_any_role(&self, token: &str, roles: &[&str]) -> bool;
    fn check_permissions(&self, token: &str, resource: &str, scope: &str) -> bool;

    fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn search_users(&self, query: &str, max_results: usize) -> Result<Vec<User>>;
    fn create_user(&self, user: &NewUser) -> Result<String>;
    fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<()>;
    fn delete_user(&self, user_id: &str) -> Result<()>;
    fn reset_password(&self, user_id: &str, password: &str, temporary: bool) -> Result<()>;
    fn get_user_roles(&self, user_id: &str) -> Result<Vec<Role>>;
    fn get_client_roles_for_user(&self, user_id: &str, client_id: &str) -> Result<Vec<Role>>;
    fn assign_realm_role(&self, user_id: &str, role_name: &str) -> Result<()>;
    fn remove_realm_role(&self, user_id: &str, role_name: &str) -> Result<()>;
    fn assign_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()>;
    fn remove_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()>;
    fn create_realm_role(&self, role_name: &str, description: Option<&str>) -> Result<Role>;
    fn delete_realm_role(&self, role_name: &str) -> Result<()>;
    fn get_realm_roles(&self) -> Result<Vec<Role>>;
    fn get_realm_role(&self, role_name: &str) -> Result<Role>;
    fn get_service_account_id(&self) -> Result<String>;
    fn get_client_id(&self, client_name: &str) -> Result<String>;
    fn get_client_secret(&self, client_id: &str) -> Result<String>;
    fn clear_user_sessions(&self, user_id: &str) -> Result<()>;

    fn clear_all_caches(&self);
}
