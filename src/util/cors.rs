use std::str::FromStr;

use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;

/// Parses Axum HTTP Methods from `CORS_ALLOWED_METHODS`. Falls back to GET.
pub fn parse_methods(config: &AppConfig) -> Vec<Method> {
    let methods: Vec<Method> = config
        .cors_allowed_methods
        .iter()
        .filter_map(|elem| Method::from_str(elem.trim()).ok())
        .collect();

    if methods.is_empty() {
        log::warn!("CORS_ALLOWED_METHODS contains no valid methods. Only allowing GET requests.");
        return Vec::from([Method::GET]);
    }
    methods
}

/// Parses Axum Header Values from `CORS_ALLOWED_ORIGINS`
pub fn parse_origins(config: &AppConfig) -> Vec<HeaderValue> {
    config
        .cors_allowed_origins
        .iter()
        .filter_map(|elem| HeaderValue::from_str(elem.trim()).ok())
        .collect()
}

/// CORS layer for the configured origins, or `None` if no origin is configured.
pub fn cors_layer(config: &AppConfig) -> Option<CorsLayer> {
    let origins = parse_origins(config);
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(parse_methods(config)),
    )
}
