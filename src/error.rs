use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeycloakError>;

#[derive(Error, Debug)]
pub enum KeycloakError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Keycloak returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Admin client not available: {0}")]
    AdminUnavailable(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<jsonwebtoken::errors::Error> for KeycloakError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        KeycloakError::InvalidToken(e.to_string())
    }
}

/// Standardized, client-facing description of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub http_status: Option<u16>,
}

impl KeycloakError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeycloakError::Transport(_) => true,
            KeycloakError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status reported by Keycloak, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            KeycloakError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let (code, http_status) = match self {
            KeycloakError::Config(_) => ("INVALID_CONFIG", Some(500)),
            KeycloakError::Http { status: 401, .. } => ("UNAUTHENTICATED", Some(401)),
            KeycloakError::Http { status: 403, .. } => ("PERMISSION_DENIED", Some(403)),
            KeycloakError::Http { status: 404, .. } | KeycloakError::NotFound(_) => ("NOT_FOUND", Some(404)),
            KeycloakError::Http { status: 409, .. } => ("ALREADY_EXISTS", Some(409)),
            KeycloakError::Http { status, .. } if *status < 500 => ("INVALID_ARGUMENT", Some(400)),
            KeycloakError::Http { .. } | KeycloakError::Transport(_) => ("UNAVAILABLE", Some(503)),
            KeycloakError::InvalidToken(_) => ("INVALID_TOKEN", Some(401)),
            KeycloakError::AdminUnavailable(_) => ("ADMIN_UNAVAILABLE", Some(503)),
            KeycloakError::RetriesExhausted { .. } => ("RESOURCE_EXHAUSTED", Some(503)),
            KeycloakError::Json(_) => ("INVALID_RESPONSE", Some(502)),
            KeycloakError::Io(_) | KeycloakError::Runtime(_) => ("INTERNAL_ERROR", Some(500)),
        };

        ErrorDetail {
            code,
            message: self.to_string(),
            http_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let e = KeycloakError::Http { status: 503, message: "down".into() };
        assert!(e.is_retryable());
        let e = KeycloakError::Http { status: 429, message: "slow down".into() };
        assert!(e.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let e = KeycloakError::Http { status: 401, message: "invalid_grant".into() };
        assert!(!e.is_retryable());
        assert!(!KeycloakError::InvalidToken("expired".into()).is_retryable());
    }

    #[test]
    fn detail_maps_status_codes() {
        let d = KeycloakError::Http { status: 409, message: "User exists".into() }.detail();
        assert_eq!(d.code, "ALREADY_EXISTS");
        assert_eq!(d.http_status, Some(409));

        let d = KeycloakError::InvalidToken("bad signature".into()).detail();
        assert_eq!(d.code, "INVALID_TOKEN");
        assert_eq!(d.http_status, Some(401));

        let d = KeycloakError::RetriesExhausted { attempts: 4, last: "HTTP 502".into() }.detail();
        assert_eq!(d.code, "RESOURCE_EXHAUSTED");
        assert!(d.message.contains("4 attempts"));
    }
}
