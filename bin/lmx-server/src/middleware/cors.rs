//! CORS layer construction.

use crate::config::Config;
use tower_http::cors::{Any, CorsLayer};

/// Builds a [`CorsLayer`] from [`Config::cors_allowed_origins`]. `None`, or a
/// list that parses to nothing, allows any origin.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers(Any)
            .allow_methods(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_origins(origins: Option<&str>) -> Config {
        let mut config = Config::from_env();
        config.cors_allowed_origins = origins.map(str::to_string);
        config
    }

    #[test]
    fn unset_origins_builds_without_panicking() {
        let _ = cors_layer(&config_with_origins(None));
    }

    #[test]
    fn comma_separated_origins_build_without_panicking() {
        let _ = cors_layer(&config_with_origins(Some("https://a.example, https://b.example")));
    }
}
