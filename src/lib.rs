//! Keycloak / OpenID Connect adapter.
//!
//! [`AsyncKeycloakAdapter`] and [`KeycloakAdapter`] expose the same token,
//! user-info, validation, authorization and admin operations through the
//! [`AsyncKeycloakPort`] and [`KeycloakPort`] traits; [`server::AuthLayer`]
//! puts the async adapter in front of axum routes.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod port;
pub mod retry;
pub mod server;
pub mod timing;

pub use adapter::{AsyncKeycloakAdapter, KeycloakAdapter};
pub use config::{AppConfig, KeycloakConfig};
pub use error::{ErrorDetail, KeycloakError, Result};
pub use models::{TokenClaims, TokenResponse, UserInfo};
pub use port::{AsyncKeycloakPort, KeycloakPort};
