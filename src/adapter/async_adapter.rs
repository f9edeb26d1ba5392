use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::header::LOCATION;
use reqwest::Method;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::admin::{Admin, AdminSession};
use super::http::{json, Form, KeycloakHttp};
use super::jwt;
use crate::cache::AdapterCaches;
use crate::config::{AppConfig, KeycloakConfig};
use crate::models::{
    ClientRepresentation, ClientSecret, Credential, Introspection, NewUser, OidcConfiguration, Permission,
    RealmInfo, Role, TokenClaims, TokenResponse, User, UserInfo, UserUpdate,
};
use crate::port::AsyncKeycloakPort;
use crate::{KeycloakError, Result};

const UMA_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Minimum gap between key-set refetches triggered by an unknown `kid`.
const JWKS_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Fields tried in order by `search_users`.
const SEARCH_FIELDS: [&str; 4] = ["username", "email", "firstName", "lastName"];

/// Log a failed operation and pass the error on. Rejected tokens are the
/// caller's fault and only show up at debug.
fn failed(op: &'static str) -> impl Fn(KeycloakError) -> KeycloakError {
    move |e| {
        match &e {
            KeycloakError::InvalidToken(_) => debug!("Rejected token in {}: {}", op, e),
            _ => error!("Failed to {}: {}", op, e),
        }
        e
    }
}

/// Keycloak adapter for async callers.
///
/// Talks to the realm's OpenID Connect endpoints for token work and to the
/// admin REST API (as the client's service account) for user and role
/// management. Lookups that tolerate some staleness are cached per
/// [`AdapterCaches`]; writes invalidate the affected caches.
pub struct AsyncKeycloakAdapter {
    config: Arc<KeycloakConfig>,
    http: KeycloakHttp,
    session: AdminSession,
    caches: AdapterCaches,
    certs_refetched: Mutex<Option<Instant>>,
}

impl AsyncKeycloakAdapter {
    pub fn new(config: KeycloakConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            http: KeycloakHttp::new(Arc::clone(&config))?,
            session: AdminSession::default(),
            caches: AdapterCaches::new(&config.cache),
            certs_refetched: Mutex::new(None),
            config,
        })
    }

    /// Build from the configuration installed with [`AppConfig::set_global`].
    pub fn from_global() -> Result<Self> {
        Self::new(AppConfig::global()?.keycloak.clone())
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    pub fn caches(&self) -> &AdapterCaches {
        &self.caches
    }

    fn admin(&self) -> Admin<'_> {
        Admin::new(&self.http, &self.session)
    }

    async fn fetch_realm_key(&self) -> Result<String> {
        let realm: RealmInfo = self.http.get_json("realm", &self.config.realm_url(), None).await?;
        Ok(jwt::pem_from_realm_key(&realm.public_key))
    }

    /// Verify `token` against the realm keys. Tokens with a `kid` are checked
    /// against the matching JWKS key; on a miss the key set is refetched to
    /// pick up rotated keys, at most once per [`JWKS_REFETCH_INTERVAL`].
    /// Everything else uses the realm public key.
    async fn decode(&self, token: &str) -> Result<TokenClaims> {
        let header = jwt::header(token)?;

        if let Some(kid) = header.kid.as_deref() {
            match self.get_certs().await {
                Ok(jwks) => {
                    let key = match jwt::jwk_key(&jwks, kid)? {
                        Some(key) => Some(key),
                        None if self.claim_certs_refetch() => {
                            debug!("Key {} not in cached JWKS, refetching", kid);
                            match self.refetch_certs().await {
                                Ok(jwks) => jwt::jwk_key(&jwks, kid)?,
                                Err(e) => {
                                    debug!("JWKS refetch failed: {}", e);
                                    None
                                }
                            }
                        }
                        None => None,
                    };
                    if let Some(key) = key {
                        return jwt::verify(token, &header, &key);
                    }
                }
                Err(e) => debug!("JWKS unavailable, falling back to realm key: {}", e),
            }
        }

        let pem = self.get_public_key().await?;
        jwt::verify(token, &header, &jwt::pem_key(&pem)?)
    }

    /// True when no refetch happened within the interval; records this one.
    fn claim_certs_refetch(&self) -> bool {
        let mut last = self.certs_refetched.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < JWKS_REFETCH_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Fetch the key set once, replacing the cached copy only on success.
    async fn refetch_certs(&self) -> Result<JwkSet> {
        let url = self.config.certs_endpoint();
        let jwks: JwkSet = self.http.get_json("certs", &url, None).await?;
        self.caches.certs.insert((), jwks.clone());
        Ok(jwks)
    }

    async fn find_users(&self, field: &str, value: &str, exact: bool, max: Option<usize>) -> Result<Vec<User>> {
        let mut query = vec![(field, value.to_string())];
        if exact {
            query.push(("exact", "true".to_string()));
        }
        if let Some(max) = max {
            query.push(("max", max.to_string()));
        }
        self.admin().get(&["users"], &query).await
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<User>> {
        match self.admin().get::<User>(&["users", user_id], &[]).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_realm_role(&self, role_name: &str) -> Result<Role> {
        self.admin().get(&["roles", role_name], &[]).await
    }

    async fn fetch_client_role(&self, client_uuid: &str, role_name: &str) -> Result<Role> {
        self.admin().get(&["clients", client_uuid, "roles", role_name], &[]).await
    }

    async fn post_form(&self, label: &str, url: &str, form: Form) -> Result<()> {
        let form = self.http.with_client_auth(form);
        self.http.send(label, true, |c| c.post(url).form(&form)).await?;
        Ok(())
    }
}

#[async_trait]
impl AsyncKeycloakPort for AsyncKeycloakAdapter {
    async fn get_token(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let form = vec![
            ("grant_type", "password".to_string()),
            ("username", username.to_string()),
            ("password", password.to_string()),
        ];
        self.http.token_grant(form, true).await.map_err(failed("get token"))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        self.http.token_grant(form, true).await.map_err(failed("refresh token"))
    }

    async fn get_token_from_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        // codes are single-use
        self.http
            .token_grant(form, false)
            .await
            .map_err(failed("exchange code for token"))
    }

    async fn get_client_credentials_token(&self) -> Result<TokenResponse> {
        if self.config.client_secret().is_none() {
            return Err(KeycloakError::Config(
                "client_secret is required for the client_credentials grant".into(),
            ));
        }
        let form = vec![("grant_type", "client_credentials".to_string())];
        self.http
            .token_grant(form, true)
            .await
            .map_err(failed("get client credentials token"))
    }

    async fn logout(&self, refresh_token: &str) -> Result<()> {
        let form = vec![("refresh_token", refresh_token.to_string())];
        self.post_form("logout", &self.config.logout_endpoint(), form)
            .await
            .map_err(failed("logout"))
    }

    async fn validate_token(&self, token: &str) -> bool {
        match self.decode(token).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Token validation failed: {}", e);
                false
            }
        }
    }

    async fn get_userinfo(&self, token: &str) -> Result<UserInfo> {
        if !self.validate_token(token).await {
            debug!("Invalid token provided for userinfo request");
            return Err(KeycloakError::InvalidToken("Invalid token provided".into()));
        }
        let url = self.config.userinfo_endpoint();
        self.caches
            .userinfo
            .get_or_fetch(token.to_string(), self.http.get_json("userinfo", &url, Some(token)))
            .await
            .map_err(failed("get user info"))
    }

    async fn get_token_info(&self, token: &str) -> Result<TokenClaims> {
        self.decode(token).await.map_err(failed("get token info"))
    }

    async fn introspect_token(&self, token: &str) -> Result<Introspection> {
        let form = self.http.with_client_auth(vec![("token", token.to_string())]);
        let url = self.config.introspect_endpoint();
        let resp = self
            .http
            .send("introspect", true, |c| c.post(&url).form(&form))
            .await
            .map_err(failed("introspect token"))?;
        json(resp).await.map_err(failed("introspect token"))
    }

    async fn get_public_key(&self) -> Result<String> {
        self.caches
            .public_key
            .get_or_fetch((), self.fetch_realm_key())
            .await
            .map_err(failed("get public key"))
    }

    async fn get_well_known_config(&self) -> Result<OidcConfiguration> {
        let url = self.config.well_known_endpoint();
        self.caches
            .well_known
            .get_or_fetch((), self.http.get_json("well-known", &url, None))
            .await
            .map_err(failed("get well-known config"))
    }

    async fn get_certs(&self) -> Result<JwkSet> {
        let url = self.config.certs_endpoint();
        self.caches
            .certs
            .get_or_fetch((), self.http.get_json("certs", &url, None))
            .await
            .map_err(failed("get certificates"))
    }

    async fn has_role(&self, token: &str, role: &str) -> bool {
        match self.decode(token).await {
            Ok(claims) => claims.has_role(role),
            Err(e) => {
                debug!("Role check failed: {}", e);
                false
            }
        }
    }

    async fn has_any_role(&self, token: &str, roles: &[&str]) -> bool {
        match self.decode(token).await {
            Ok(claims) => claims.has_any_role(roles),
            Err(e) => {
                debug!("Role check failed: {}", e);
                false
            }
        }
    }

    async fn check_permissions(&self, token: &str, resource: &str, scope: &str) -> bool {
        let form: Form = vec![
            ("grant_type", UMA_GRANT.to_string()),
            ("audience", self.config.client_id.clone()),
            ("permission", format!("{}#{}", resource, scope)),
            ("response_mode", "permissions".to_string()),
        ];
        let url = self.config.token_endpoint();
        let result = match self
            .http
            .send("uma permissions", true, |c| c.post(&url).bearer_auth(token).form(&form))
            .await
        {
            Ok(resp) => json::<Vec<Permission>>(resp).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(permissions) => permissions
                .iter()
                .any(|p| p.rsname == resource && p.scopes.iter().any(|s| s == scope)),
            Err(e @ KeycloakError::Http { .. }) => {
                debug!("Permission check denied by Keycloak: {}", e);
                false
            }
            Err(e) => {
                error!("Unexpected error in permission check: {}", e);
                false
            }
        }
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.caches
            .user_by_id
            .get_or_fetch(user_id.to_string(), self.fetch_user(user_id))
            .await
            .map_err(failed("get user by ID"))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let fetch = async {
            let users = self.find_users("username", username, true, Some(1)).await?;
            Ok::<_, KeycloakError>(users.into_iter().next())
        };
        self.caches
            .user_by_username
            .get_or_fetch(username.to_string(), fetch)
            .await
            .map_err(failed("get user by username"))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let fetch = async {
            let users = self.find_users("email", email, true, Some(1)).await?;
            Ok::<_, KeycloakError>(users.into_iter().next())
        };
        self.caches
            .user_by_email
            .get_or_fetch(email.to_string(), fetch)
            .await
            .map_err(failed("get user by email"))
    }

    async fn search_users(&self, query: &str, max_results: usize) -> Result<Vec<User>> {
        let fetch = async {
            let mut users: Vec<User> = Vec::new();
            let mut seen = HashSet::new();
            for field in SEARCH_FIELDS {
                if users.len() >= max_results {
                    break;
                }
                let remaining = max_results - users.len();
                for user in self.find_users(field, query, false, Some(remaining)).await? {
                    if seen.insert(user.id.clone()) {
                        users.push(user);
                    }
                }
            }
            users.truncate(max_results);
            Ok::<_, KeycloakError>(users)
        };
        self.caches
            .search_users
            .get_or_fetch((query.to_string(), max_results), fetch)
            .await
            .map_err(failed("search users"))
    }

    async fn create_user(&self, user: &NewUser) -> Result<String> {
        let resp = self
            .admin()
            .create(&["users"], user)
            .await
            .map_err(failed("create user"))?;

        let from_location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let user_id = match from_location {
            Some(id) => id,
            None => self
                .find_users("username", &user.username, true, Some(1))
                .await?
                .into_iter()
                .next()
                .map(|u| u.id)
                .ok_or_else(|| KeycloakError::NotFound(format!("created user '{}'", user.username)))
                .map_err(failed("create user"))?,
        };

        self.caches.clear_all();
        info!("Created user {} with ID {}", user.username, user_id);
        Ok(user_id)
    }

    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<()> {
        self.admin()
            .send(Method::PUT, &["users", user_id], Some(update))
            .await
            .map_err(failed("update user"))?;
        self.caches.clear_all();
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.admin()
            .send::<()>(Method::DELETE, &["users", user_id], None)
            .await
            .map_err(failed("delete user"))?;
        self.caches.clear_all();
        info!("Successfully deleted user with ID {}", user_id);
        Ok(())
    }

    async fn reset_password(&self, user_id: &str, password: &str, temporary: bool) -> Result<()> {
        let credential = Credential::password(password, temporary);
        self.admin()
            .send(Method::PUT, &["users", user_id, "reset-password"], Some(&credential))
            .await
            .map_err(failed("reset password"))?;
        Ok(())
    }

    async fn get_user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        let admin = self.admin();
        self.caches
            .user_roles
            .get_or_fetch(
                user_id.to_string(),
                admin.get(&["users", user_id, "role-mappings", "realm"], &[]),
            )
            .await
            .map_err(failed("get user roles"))
    }

    async fn get_client_roles_for_user(&self, user_id: &str, client_id: &str) -> Result<Vec<Role>> {
        let fetch = async {
            let client_uuid = self.get_client_id(client_id).await?;
            self.admin()
                .get(&["users", user_id, "role-mappings", "clients", &client_uuid], &[])
                .await
        };
        self.caches
            .client_roles
            .get_or_fetch((user_id.to_string(), client_id.to_string()), fetch)
            .await
            .map_err(failed("get client roles"))
    }

    async fn assign_realm_role(&self, user_id: &str, role_name: &str) -> Result<()> {
        let result = async {
            let role = self.fetch_realm_role(role_name).await?;
            self.admin()
                .send(Method::POST, &["users", user_id, "role-mappings", "realm"], Some(&[role]))
                .await
        }
        .await;
        result.map_err(failed("assign realm role"))?;
        self.caches.user_roles.clear();
        Ok(())
    }

    async fn remove_realm_role(&self, user_id: &str, role_name: &str) -> Result<()> {
        let result = async {
            let role = self.fetch_realm_role(role_name).await?;
            self.admin()
                .send(Method::DELETE, &["users", user_id, "role-mappings", "realm"], Some(&[role]))
                .await
        }
        .await;
        result.map_err(failed("remove realm role"))?;
        self.caches.user_roles.clear();
        Ok(())
    }

    async fn assign_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()> {
        let result = async {
            let client_uuid = self.get_client_id(client_id).await?;
            let role = self.fetch_client_role(&client_uuid, role_name).await?;
            self.admin()
                .send(
                    Method::POST,
                    &["users", user_id, "role-mappings", "clients", &client_uuid],
                    Some(&[role]),
                )
                .await
        }
        .await;
        result.map_err(failed("assign client role"))?;
        self.caches.client_roles.clear();
        Ok(())
    }

    async fn remove_client_role(&self, user_id: &str, client_id: &str, role_name: &str) -> Result<()> {
        let result = async {
            let client_uuid = self.get_client_id(client_id).await?;
            let role = self.fetch_client_role(&client_uuid, role_name).await?;
            self.admin()
                .send(
                    Method::DELETE,
                    &["users", user_id, "role-mappings", "clients", &client_uuid],
                    Some(&[role]),
                )
                .await
        }
        .await;
        result.map_err(failed("remove client role"))?;
        self.caches.client_roles.clear();
        Ok(())
    }

    async fn create_realm_role(&self, role_name: &str, description: Option<&str>) -> Result<Role> {
        let mut body = serde_json::Map::new();
        body.insert("name".into(), role_name.into());
        if let Some(description) = description {
            body.insert("description".into(), description.into());
        }

        self.admin()
            .create(&["roles"], &body)
            .await
            .map_err(failed("create realm role"))?;
        self.caches.realm_roles.clear();
        self.caches.realm_role.remove(&role_name.to_string());

        self.fetch_realm_role(role_name).await.map_err(failed("create realm role"))
    }

    async fn delete_realm_role(&self, role_name: &str) -> Result<()> {
        self.admin()
            .send::<()>(Method::DELETE, &["roles", role_name], None)
            .await
            .map_err(failed("delete realm role"))?;
        self.caches.realm_roles.clear();
        self.caches.realm_role.remove(&role_name.to_string());
        self.caches.user_roles.clear();
        Ok(())
    }

    async fn get_realm_roles(&self) -> Result<Vec<Role>> {
        self.caches
            .realm_roles
            .get_or_fetch((), self.admin().get(&["roles"], &[]))
            .await
            .map_err(failed("get realm roles"))
    }

    async fn get_realm_role(&self, role_name: &str) -> Result<Role> {
        self.caches
            .realm_role
            .get_or_fetch(role_name.to_string(), self.fetch_realm_role(role_name))
            .await
            .map_err(failed("get realm role"))
    }

    async fn get_service_account_id(&self) -> Result<String> {
        let fetch = async {
            let client_uuid = self.get_client_id(&self.config.client_id).await?;
            let user: User = self
                .admin()
                .get(&["clients", &client_uuid, "service-account-user"], &[])
                .await?;
            Ok::<_, KeycloakError>(user.id)
        };
        self.caches
            .service_account_id
            .get_or_fetch((), fetch)
            .await
            .map_err(failed("get service account ID"))
    }

    async fn get_client_id(&self, client_name: &str) -> Result<String> {
        let fetch = async {
            let clients: Vec<ClientRepresentation> = self
                .admin()
                .get(&["clients"], &[("clientId", client_name.to_string())])
                .await?;
            clients
                .into_iter()
                .find(|c| c.client_id == client_name)
                .map(|c| c.id)
                .ok_or_else(|| KeycloakError::NotFound(format!("client '{}'", client_name)))
        };
        self.caches
            .client_id
            .get_or_fetch(client_name.to_string(), fetch)
            .await
            .map_err(failed("get client ID"))
    }

    async fn get_client_secret(&self, client_id: &str) -> Result<String> {
        let fetch = async {
            let client_uuid = self.get_client_id(client_id).await?;
            let secret: ClientSecret = self
                .admin()
                .get(&["clients", &client_uuid, "client-secret"], &[])
                .await?;
            Ok::<_, KeycloakError>(secret.value.unwrap_or_default())
        };
        self.caches
            .client_secret
            .get_or_fetch(client_id.to_string(), fetch)
            .await
            .map_err(failed("get client secret"))
    }

    async fn clear_user_sessions(&self, user_id: &str) -> Result<()> {
        self.admin()
            .send::<()>(Method::POST, &["users", user_id, "logout"], None)
            .await
            .map_err(failed("clear user sessions"))?;
        self.caches.userinfo.clear();
        Ok(())
    }

    fn clear_all_caches(&self) {
        self.caches.clear_all();
    }
}
