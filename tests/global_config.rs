use kc_adapter::{AppConfig, AsyncKeycloakAdapter, KeycloakAdapter, KeycloakConfig, KeycloakError};

// One test per binary: the global config is process-wide.
#[test]
fn adapters_build_from_global_config() {
    assert!(matches!(AsyncKeycloakAdapter::from_global(), Err(KeycloakError::Config(_))));
    assert!(matches!(KeycloakAdapter::from_global(), Err(KeycloakError::Config(_))));

    let config = AppConfig {
        keycloak: KeycloakConfig::new("http://127.0.0.1:9", "shop", "storefront"),
    };
    AppConfig::set_global(config.clone()).unwrap();
    assert!(matches!(AppConfig::set_global(config), Err(KeycloakError::Config(_))));

    let async_adapter = AsyncKeycloakAdapter::from_global().unwrap();
    assert_eq!(async_adapter.config().realm_name, "shop");

    let sync_adapter = KeycloakAdapter::from_global().unwrap();
    assert_eq!(sync_adapter.config().client_id, "storefront");
    assert_eq!(
        sync_adapter.config().token_endpoint(),
        "http://127.0.0.1:9/realms/shop/protocol/openid-connect/token"
    );
}
