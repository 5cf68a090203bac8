//! Provider/model catalog exposed to the client dropdown.

use axum::response::IntoResponse;
use axum::Json;

use mf_domain::constants::{provider_models, DEFAULT_MODEL, DEFAULT_PROVIDER, SUPPORTED_PROVIDERS};

/// `GET /api/models`
pub async fn models() -> impl IntoResponse {
    let mut catalog = serde_json::Map::new();
    for provider in SUPPORTED_PROVIDERS {
        catalog.insert(provider.to_string(), serde_json::json!(provider_models(provider)));
    }

    Json(serde_json::json!({
        "providers": SUPPORTED_PROVIDERS,
        "models": catalog,
        "default": {"provider": DEFAULT_PROVIDER, "model": DEFAULT_MODEL},
    }))
}
