use jsonwebtoken::jwk::JwkSet;
use lru::LruCache;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::{OidcConfiguration, Role, User, UserInfo};
use crate::Result;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded LRU cache whose entries also expire after a fixed TTL.
pub struct TtlCache<K: Hash + Eq, V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(name: &'static str, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`; an expired entry is dropped and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + self.ttl;
        self.lock().put(key, Entry { value, expires_at });
    }

    pub fn remove(&self, key: &K) {
        self.lock().pop(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value or resolve `fetch` and cache its success.
    /// `fetch` is not polled on a hit.
    pub async fn get_or_fetch<F>(&self, key: K, fetch: F) -> Result<V>
    where
        F: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            debug!("{} cache hit", self.name);
            return Ok(value);
        }
        let value = fetch.await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

/// One cache per cached Keycloak lookup.
pub struct AdapterCaches {
    pub public_key: TtlCache<(), String>,
    pub well_known: TtlCache<(), OidcConfiguration>,
    pub certs: TtlCache<(), JwkSet>,
    pub service_account_id: TtlCache<(), String>,
    pub client_id: TtlCache<String, String>,
    pub client_secret: TtlCache<String, String>,
    pub user_by_id: TtlCache<String, Option<User>>,
    pub user_by_username: TtlCache<String, Option<User>>,
    pub user_by_email: TtlCache<String, Option<User>>,
    pub user_roles: TtlCache<String, Vec<Role>>,
    pub client_roles: TtlCache<(String, String), Vec<Role>>,
    pub realm_roles: TtlCache<(), Vec<Role>>,
    pub realm_role: TtlCache<String, Role>,
    pub userinfo: TtlCache<String, UserInfo>,
    pub search_users: TtlCache<(String, usize), Vec<User>>,
}

impl AdapterCaches {
    pub fn new(config: &CacheConfig) -> Self {
        let secs = |s: u64| {
            if config.enabled {
                Duration::from_secs(s)
            } else {
                Duration::ZERO
            }
        };
        let short = secs(config.short_ttl_secs);
        let user = secs(config.user_ttl_secs);
        let long = secs(config.long_ttl_secs);

        Self {
            public_key: TtlCache::new("public_key", long, 1),
            well_known: TtlCache::new("well_known", long, 1),
            certs: TtlCache::new("certs", long, 1),
            service_account_id: TtlCache::new("service_account_id", long, 1),
            client_id: TtlCache::new("client_id", long, 50),
            client_secret: TtlCache::new("client_secret", long, 50),
            user_by_id: TtlCache::new("user_by_id", user, 100),
            user_by_username: TtlCache::new("user_by_username", user, 100),
            user_by_email: TtlCache::new("user_by_email", user, 100),
            user_roles: TtlCache::new("user_roles", user, 100),
            client_roles: TtlCache::new("client_roles", user, 100),
            realm_roles: TtlCache::new("realm_roles", user, 1),
            realm_role: TtlCache::new("realm_role", user, 50),
            userinfo: TtlCache::new("userinfo", short, 100),
            search_users: TtlCache::new("search_users", short, 50),
        }
    }

    /// Drop every user-derived entry.
    pub fn clear_users(&self) {
        self.user_by_id.clear();
        self.user_by_username.clear();
        self.user_by_email.clear();
        self.user_roles.clear();
        self.client_roles.clear();
        self.userinfo.clear();
        self.search_users.clear();
    }

    pub fn clear_all(&self) {
        self.clear_users();
        self.public_key.clear();
        self.well_known.clear();
        self.certs.clear();
        self.service_account_id.clear();
        self.client_id.clear();
        self.client_secret.clear();
        self.realm_roles.clear();
        self.realm_role.clear();
    }
}
