use once_cell::sync::OnceCell;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{KeycloakError, Result};

/// Prefix for environment overrides, e.g. `KEYCLOAK__SERVER_URL`.
pub const ENV_PREFIX: &str = "KEYCLOAK__";

static GLOBAL: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug)]
pub struct KeycloakConfig {
    pub server_url: String,
    pub realm_name: String,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub verify_ssl: bool,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// TTLs for the three freshness classes of cached lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    /// User info and user search.
    pub short_ttl_secs: u64,
    /// Users and role mappings.
    pub user_ttl_secs: u64,
    /// Realm keys, discovery document, client lookups.
    pub long_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            short_ttl_secs: 30,
            user_ttl_secs: 300,
            long_ttl_secs: 3600,
        }
    }
}

impl Clone for KeycloakConfig {
    fn clone(&self) -> Self {
        Self {
            server_url: self.server_url.clone(),
            realm_name: self.realm_name.clone(),
            client_id: self.client_id.clone(),
            client_secret: self
                .client_secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
            verify_ssl: self.verify_ssl,
            timeout: self.timeout,
            retry: self.retry.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            realm_name: "master".to_string(),
            client_id: "admin-cli".to_string(),
            client_secret: None,
            verify_ssl: true,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl KeycloakConfig {
    pub fn new(server_url: impl Into<String>, realm_name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            realm_name: realm_name.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_ref().map(|s| s.expose_secret())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| KeycloakError::Config(format!("server_url '{}' is not a URL: {}", self.server_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(KeycloakError::Config(format!(
                "server_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.realm_name.trim().is_empty() {
            return Err(KeycloakError::Config("realm_name must not be empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(KeycloakError::Config("client_id must not be empty".into()));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Realm base URL with the realm name percent-encoded.
    pub fn realm_url(&self) -> String {
        self.url_for(&["realms", self.realm_name.as_str()])
            .map(String::from)
            .unwrap_or_else(|_| format!("{}/realms/{}", self.base(), self.realm_name))
    }

    fn oidc_url(&self, path: &str) -> String {
        format!("{}/protocol/openid-connect/{}", self.realm_url(), path)
    }

    pub fn token_endpoint(&self) -> String {
        self.oidc_url("token")
    }

    pub fn introspect_endpoint(&self) -> String {
        self.oidc_url("token/introspect")
    }

    pub fn userinfo_endpoint(&self) -> String {
        self.oidc_url("userinfo")
    }

    pub fn logout_endpoint(&self) -> String {
        self.oidc_url("logout")
    }

    pub fn certs_endpoint(&self) -> String {
        self.oidc_url("certs")
    }

    pub fn well_known_endpoint(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.realm_url())
    }

    /// Admin REST URL for the configured realm; segments are percent-encoded.
    pub fn admin_url(&self, segments: &[&str]) -> Result<Url> {
        let mut path = vec!["admin", "realms", self.realm_name.as_str()];
        path.extend_from_slice(segments);
        self.url_for(&path)
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(self.base())
            .map_err(|e| KeycloakError::Config(format!("server_url is not a URL: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| KeycloakError::Config("server_url cannot be a base URL".into()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }
}

/// On-disk / environment shape of the Keycloak section. Every field is
/// optional so layers can be merged over the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeycloakSection {
    server_url: Option<String>,
    realm_name: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    verify_ssl: Option<bool>,
    timeout: Option<u64>,
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    cache_enabled: Option<bool>,
    cache_short_ttl_secs: Option<u64>,
    cache_user_ttl_secs: Option<u64>,
    cache_long_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(alias = "KEYCLOAK")]
    keycloak: KeycloakSection,
}

impl KeycloakSection {
    fn apply(self, config: &mut KeycloakConfig) {
        if let Some(v) = self.server_url {
            config.server_url = v;
        }
        if let Some(v) = self.realm_name {
            config.realm_name = v;
        }
        if let Some(v) = self.client_id {
            config.client_id = v;
        }
        if let Some(v) = self.client_secret {
            config.client_secret = Some(SecretString::from(v));
        }
        if let Some(v) = self.verify_ssl {
            config.verify_ssl = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.max_retries {
            config.retry.max_retries = v;
        }
        if let Some(v) = self.initial_backoff_ms {
            config.retry.initial_backoff_ms = v;
        }
        if let Some(v) = self.max_backoff_ms {
            config.retry.max_backoff_ms = v;
        }
        if let Some(v) = self.cache_enabled {
            config.cache.enabled = v;
        }
        if let Some(v) = self.cache_short_ttl_secs {
            config.cache.short_ttl_secs = v;
        }
        if let Some(v) = self.cache_user_ttl_secs {
            config.cache.user_ttl_secs = v;
        }
        if let Some(v) = self.cache_long_ttl_secs {
            config.cache.long_ttl_secs = v;
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| KeycloakError::Config(format!("{}{} has an invalid value '{}'", ENV_PREFIX, key, value)))
}

/// Application configuration. Sources, highest priority first:
/// `KEYCLOAK__*` environment variables, the TOML file, built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub keycloak: KeycloakConfig,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("is", "8b", "kc-adapter")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("kc-adapter.toml"))
    }

    /// Load from `path` (or the default location) and the process environment.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// [`AppConfig::load`] with an explicit set of environment variables.
    pub fn load_with_env<I, K, V>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            debug!("Loading config from {}", path.display());
            Self::from_toml_str(&std::fs::read_to_string(&path)?)?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(vars)?;
        config.keycloak.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| KeycloakError::Config(format!("Invalid config file: {}", e)))?;
        let mut config = Self::default();
        file.keycloak.apply(&mut config.keycloak);
        Ok(config)
    }

    /// Apply `KEYCLOAK__<FIELD>` overrides. Unknown keys and empty values are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut section = KeycloakSection::default();
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            match field.to_ascii_uppercase().as_str() {
                "SERVER_URL" => section.server_url = Some(value.to_owned()),
                "REALM_NAME" => section.realm_name = Some(value.to_owned()),
                "CLIENT_ID" => section.client_id = Some(value.to_owned()),
                "CLIENT_SECRET_KEY" | "CLIENT_SECRET" => section.client_secret = Some(value.to_owned()),
                "VERIFY_SSL" => section.verify_ssl = Some(parse_env(field, value)?),
                "TIMEOUT" => section.timeout = Some(parse_env(field, value)?),
                "MAX_RETRIES" => section.max_retries = Some(parse_env(field, value)?),
                "INITIAL_BACKOFF_MS" => section.initial_backoff_ms = Some(parse_env(field, value)?),
                "MAX_BACKOFF_MS" => section.max_backoff_ms = Some(parse_env(field, value)?),
                "CACHE_ENABLED" => section.cache_enabled = Some(parse_env(field, value)?),
                "CACHE_SHORT_TTL_SECS" => section.cache_short_ttl_secs = Some(parse_env(field, value)?),
                "CACHE_USER_TTL_SECS" => section.cache_user_ttl_secs = Some(parse_env(field, value)?),
                "CACHE_LONG_TTL_SECS" => section.cache_long_ttl_secs = Some(parse_env(field, value)?),
                other => debug!("Ignoring unknown setting {}{}", ENV_PREFIX, other),
            }
        }
        section.apply(&mut self.keycloak);
        Ok(())
    }

    /// Install the process-wide configuration. Can only be done once.
    pub fn set_global(config: AppConfig) -> Result<()> {
        GLOBAL
            .set(config)
            .map_err(|_| KeycloakError::Config("Global config is already set".into()))
    }

    pub fn global() -> Result<&'static AppConfig> {
        GLOBAL
            .get()
            .ok_or_else(|| KeycloakError::Config("Global config not set, call AppConfig::set_global first".into()))
    }
}
