use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::port::AsyncKeycloakPort;

/// Guards routes with Keycloak-issued bearer tokens.
///
/// Missing or invalid tokens get `401`; when roles are required, a valid
/// token holding none of them gets `403`. On success the verified
/// [`TokenClaims`](crate::models::TokenClaims) are put into the request
/// extensions for handlers to extract.
#[derive(Clone)]
pub struct AuthLayer {
    keycloak: Arc<dyn AsyncKeycloakPort>,
    public_paths: Arc<Vec<String>>,
    required_roles: Arc<Vec<String>>,
}

impl AuthLayer {
    pub fn new(keycloak: Arc<dyn AsyncKeycloakPort>) -> Self {
        Self {
            keycloak,
            public_paths: Arc::new(vec!["/health".to_string()]),
            required_roles: Arc::new(Vec::new()),
        }
    }

    /// Paths served without a token. An entry ending in `/` matches its whole subtree.
    pub fn with_public_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_paths = Arc::new(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Require at least one of `roles` (realm or client roles).
    pub fn require_any_role<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles = Arc::new(roles.into_iter().map(Into::into).collect());
        self
    }
}

impl<S> tower::Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            keycloak: Arc::clone(&self.keycloak),
            public_paths: Arc::clone(&self.public_paths),
            required_roles: Arc::clone(&self.required_roles),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    keycloak: Arc<dyn AsyncKeycloakPort>,
    public_paths: Arc<Vec<String>>,
    required_roles: Arc<Vec<String>>,
}

fn is_public(path: &str, public_paths: &[String]) -> bool {
    public_paths.iter().any(|p| {
        if p.ends_with('/') {
            path.starts_with(p.as_str())
        } else {
            path == p
        }
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl<S> tower::Service<Request> for AuthMiddleware<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);
        let keycloak = Arc::clone(&self.keycloak);
        let public_paths = Arc::clone(&self.public_paths);
        let required_roles = Arc::clone(&self.required_roles);

        Box::pin(async move {
            if is_public(request.uri().path(), &public_paths) {
                return inner.call(request).await;
            }

            let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
                return Ok(unauthorized());
            };

            let claims = match keycloak.get_token_info(&token).await {
                Ok(claims) => claims,
                Err(e) => {
                    debug!("Rejected bearer token for {}: {}", request.uri().path(), e);
                    return Ok(unauthorized());
                }
            };

            if !required_roles.is_empty() && !claims.has_any_role(required_roles.as_slice()) {
                debug!(
                    "Subject {:?} lacks any of {:?} for {}",
                    claims.sub,
                    required_roles,
                    request.uri().path()
                );
                return Ok(StatusCode::FORBIDDEN.into_response());
            }

            request.extensions_mut().insert(claims);
            inner.call(request).await
        })
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(axum::http::header::WWW_AUTHENTICATE, "Bearer")],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn public_paths_match_exactly_or_by_prefix() {
        let paths = vec!["/health".to_string(), "/static/".to_string()];
        assert!(is_public("/health", &paths));
        assert!(!is_public("/healthz", &paths));
        assert!(is_public("/static/app.js", &paths));
        assert!(!is_public("/api/users", &paths));
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
