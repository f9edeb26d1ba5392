#![allow(dead_code)]

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use kc_adapter::config::RetryConfig;
use kc_adapter::KeycloakConfig;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REALM: &str = "test";
pub const CLIENT_ID: &str = "api-client";
pub const CLIENT_SECRET: &str = "s3cr3t";
pub const KID: &str = "test-key";

pub const PRIVATE_PEM: &str = include_str!("../fixtures/test_rsa_private.pem");
pub const PUBLIC_PEM: &str = include_str!("../fixtures/test_rsa_public.pem");
pub const OTHER_PRIVATE_PEM: &str = include_str!("../fixtures/other_rsa_private.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

pub fn oidc(endpoint: &str) -> String {
    format!("/realms/{}/protocol/openid-connect/{}", REALM, endpoint)
}

pub fn admin(rest: &str) -> String {
    format!("/admin/realms/{}/{}", REALM, rest)
}

/// Base64 DER body of the public key, as `GET /realms/{realm}` returns it.
pub fn realm_public_key() -> String {
    PUBLIC_PEM
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect()
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Keycloak-shaped access token claims.
pub fn claims(username: &str, realm_roles: &[&str], client_roles: &[&str], ttl: i64) -> Value {
    let iat = now() as i64;
    json!({
        "sub": format!("{}-id", username),
        "exp": iat + ttl,
        "iat": iat,
        "iss": format!("http://keycloak/realms/{}", REALM),
        "azp": CLIENT_ID,
        "preferred_username": username,
        "realm_access": { "roles": realm_roles },
        "resource_access": { CLIENT_ID: { "roles": client_roles } },
    })
}

fn sign(claims: &Value, kid: Option<&str>, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key");
    jsonwebtoken::encode(&header, claims, &key).expect("sign token")
}

/// Token signed with the realm key and carrying its `kid`.
pub fn mint(claims: &Value) -> String {
    sign(claims, Some(KID), PRIVATE_PEM)
}

pub fn mint_without_kid(claims: &Value) -> String {
    sign(claims, None, PRIVATE_PEM)
}

pub fn mint_with_kid(claims: &Value, kid: &str) -> String {
    sign(claims, Some(kid), PRIVATE_PEM)
}

pub fn mint_forged_with_kid(claims: &Value, kid: &str) -> String {
    sign(claims, Some(kid), OTHER_PRIVATE_PEM)
}

/// Right `kid`, wrong key.
pub fn mint_forged(claims: &Value) -> String {
    sign(claims, Some(KID), OTHER_PRIVATE_PEM)
}

pub fn user_token() -> String {
    mint(&claims("alice", &["user"], &["viewer"], 300))
}

pub fn token_response(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": "refresh-abc",
        "expires_in": 300,
        "refresh_expires_in": 1800,
        "token_type": "Bearer",
        "scope": "openid profile email",
        "session_state": "sess-1",
    })
}

pub fn user_json(id: &str, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{}@example.com", username),
        "enabled": true,
        "emailVerified": true,
        "createdTimestamp": 1700000000000i64,
    })
}

pub fn role_json(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name, "composite": false, "clientRole": false, "containerId": REALM })
}

/// Fake realm: key endpoints plus the service-account grant.
pub async fn keycloak() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/realms/{}", REALM)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "realm": REALM,
            "public_key": realm_public_key(),
            "token-service": format!("{}/realms/{}/protocol/openid-connect", server.uri(), REALM),
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(oidc("certs")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
        .mount(&server)
        .await;

    server
}

/// Service-account token for admin calls; returns the mock so callers can set expectations.
pub fn admin_grant() -> Mock {
    let token = mint(&claims("service-account-api-client", &["manage-users"], &[], 300));
    Mock::given(method("POST"))
        .and(path(oidc("token")))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&token)))
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

pub fn config(server: &MockServer) -> KeycloakConfig {
    KeycloakConfig::new(server.uri(), REALM, CLIENT_ID)
        .with_client_secret(CLIENT_SECRET)
        .with_timeout(Duration::from_secs(5))
        .with_retry(fast_retry())
}

pub fn public_config(server: &MockServer) -> KeycloakConfig {
    KeycloakConfig::new(server.uri(), REALM, CLIENT_ID)
        .with_timeout(Duration::from_secs(5))
        .with_retry(fast_retry())
}

pub async fn requests_to(server: &MockServer, wanted: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == wanted)
        .count()
}
