mod auth;

pub use auth::{AuthLayer, AuthMiddleware};
