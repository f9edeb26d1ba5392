use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::KeycloakConfig;
use crate::models::TokenResponse;
use crate::retry::RetryPolicy;
use crate::timing::timed;
use crate::{KeycloakError, Result};

pub(crate) type Form = Vec<(&'static str, String)>;

/// Thin transport over `reqwest` shared by the token, userinfo and admin calls.
pub(crate) struct KeycloakHttp {
    client: Client,
    config: Arc<KeycloakConfig>,
    retry: RetryPolicy,
}

impl KeycloakHttp {
    pub fn new(config: Arc<KeycloakConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        let retry = config.retry.policy();

        Ok(Self { client, config, retry })
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    /// Build and send a request, turning non-2xx answers into errors.
    /// With `retry`, transient failures are retried per the configured policy;
    /// `build` is called once per attempt.
    pub async fn send<F>(&self, label: &str, retry: bool, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = &self.client;
        let build = &build;
        if !retry {
            return timed(label, async move { check(build(client).send().await?).await }).await;
        }
        timed(
            label,
            self.retry
                .run(move || async move { check(build(client).send().await?).await }),
        )
        .await
    }

    pub fn with_client_auth(&self, mut form: Form) -> Form {
        form.push(("client_id", self.config.client_id.clone()));
        if let Some(secret) = self.config.client_secret() {
            form.push(("client_secret", secret.to_owned()));
        }
        form
    }

    /// POST `form` plus client credentials to the token endpoint.
    pub async fn token_grant(&self, form: Form, retry: bool) -> Result<TokenResponse> {
        let form = self.with_client_auth(form);
        let url = self.config.token_endpoint();
        let resp = self.send("token", retry, |c| c.post(&url).form(&form)).await?;
        json(resp).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, label: &str, url: &str, bearer: Option<&str>) -> Result<T> {
        let resp = self
            .send(label, true, |c| {
                let req = c.get(url);
                match bearer {
                    Some(token) => req.bearer_auth(token),
                    None => req,
                }
            })
            .await?;
        json(resp).await
    }
}

pub(crate) async fn json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(KeycloakError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Pull the human readable part out of a Keycloak error body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.chars().take(512).collect());
    };
    ["error_description", "errorMessage", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .or_else(|| Some(trimmed.chars().take(512).collect()))
}
