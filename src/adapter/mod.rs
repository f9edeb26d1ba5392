mod admin;
mod async_adapter;
mod http;
mod jwt;
mod sync_adapter;

pub use async_adapter::AsyncKeycloakAdapter;
pub use sync_adapter::KeycloakAdapter;
