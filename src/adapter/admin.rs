use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::http::{json, KeycloakHttp};
use crate::{KeycloakError, Result};

/// Renew the service-account token this long before Keycloak expires it.
const RENEW_MARGIN: Duration = Duration::from_secs(30);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(60);

struct AdminToken {
    access_token: String,
    renew_at: Instant,
}

/// Service-account token for the admin REST API, obtained lazily with the
/// client-credentials grant.
#[derive(Default)]
pub(crate) struct AdminSession {
    token: Mutex<Option<AdminToken>>,
}

impl AdminSession {
    pub async fn bearer(&self, http: &KeycloakHttp) -> Result<String> {
        if http.config().client_secret().is_none() {
            return Err(KeycloakError::AdminUnavailable(
                "provide client_secret to use admin features".into(),
            ));
        }

        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.renew_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = http
            .token_grant(vec![("grant_type", "client_credentials".to_string())], true)
            .await
            .map_err(|e| {
                error!("Failed to initialize admin client: {}", e);
                KeycloakError::AdminUnavailable(e.to_string())
            })?;
        let lifetime = match token.expires_in {
            0 => DEFAULT_LIFETIME,
            secs => Duration::from_secs(secs),
        };
        debug!("Admin token obtained, valid for {:?}", lifetime);

        let access_token = token.access_token;
        *guard = Some(AdminToken {
            access_token: access_token.clone(),
            renew_at: Instant::now() + lifetime.saturating_sub(RENEW_MARGIN),
        });
        Ok(access_token)
    }

    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }
}

/// Admin REST calls for the configured realm.
pub(crate) struct Admin<'a> {
    http: &'a KeycloakHttp,
    session: &'a AdminSession,
}

impl<'a> Admin<'a> {
    pub fn new(http: &'a KeycloakHttp, session: &'a AdminSession) -> Self {
        Self { http, session }
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, String)]) -> Result<T> {
        let url = self.http.config().admin_url(segments)?;
        let resp = self
            .call("admin GET", true, |c| c.get(url.clone()).query(query))
            .await?;
        json(resp).await
    }

    /// Idempotent write (PUT, DELETE, role-mapping POST); retried on transient failures.
    pub async fn send<B>(&self, method: Method, segments: &[&str], body: Option<&B>) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.http.config().admin_url(segments)?;
        let label = format!("admin {}", method);
        self.call(&label, true, |c| {
            let req = c.request(method.clone(), url.clone());
            match body {
                Some(b) => req.json(b),
                None => req,
            }
        })
        .await
    }

    /// POST that creates a resource; sent once.
    pub async fn create<B>(&self, segments: &[&str], body: &B) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.http.config().admin_url(segments)?;
        self.call("admin POST", false, |c| c.post(url.clone()).json(body))
            .await
    }

    async fn call<F>(&self, label: &str, retry: bool, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let bearer = self.session.bearer(self.http).await?;
        let result = self
            .http
            .send(label, retry, |c| build(c).bearer_auth(&bearer))
            .await;

        match result {
            Err(e) if e.status() == Some(401) => {
                debug!("Admin token rejected, renewing");
                self.session.invalidate().await;
                let bearer = self.session.bearer(self.http).await?;
                self.http
                    .send(label, retry, |c| build(c).bearer_auth(&bearer))
                    .await
            }
            other => other,
        }
    }
}
