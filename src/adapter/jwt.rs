use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};

use crate::models::TokenClaims;
use crate::{KeycloakError, Result};

/// Signature algorithms Keycloak realm keys can produce.
const ALLOWED_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Wrap the base64 DER key from `GET /realms/{realm}` in a PEM envelope.
pub(crate) fn pem_from_realm_key(key: &str) -> String {
    let compact: String = key.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in compact.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

pub(crate) fn header(token: &str) -> Result<Header> {
    let header = decode_header(token)?;
    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        return Err(KeycloakError::InvalidToken(format!(
            "unsupported signing algorithm {:?}",
            header.alg
        )));
    }
    Ok(header)
}

/// Key from `jwks` matching `kid`, if any.
pub(crate) fn jwk_key(jwks: &JwkSet, kid: &str) -> Result<Option<DecodingKey>> {
    jwks.find(kid).map(DecodingKey::from_jwk).transpose().map_err(Into::into)
}

pub(crate) fn pem_key(pem: &str) -> Result<DecodingKey> {
    Ok(DecodingKey::from_rsa_pem(pem.as_bytes())?)
}

/// Verify signature and expiry; the audience is not checked because Keycloak
/// access tokens carry the resource servers, not the requesting client.
pub(crate) fn verify(token: &str, header: &Header, key: &DecodingKey) -> Result<TokenClaims> {
    let mut validation = Validation::new(header.alg);
    validation.validate_aud = false;
    Ok(decode::<TokenClaims>(token, key, &validation)?.claims)
}
