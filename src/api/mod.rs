use std::sync::Arc;

use axum::{
    http::{HeaderName, Method, StatusCode},
    Extension,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::client::TrustedProxyHops;
use crate::middleware::{headers, rate_limit};
use crate::AppState;

pub mod handlers;

/// Build the full HTTP surface: SSO endpoints, health checks, and the
/// cross-cutting layers.
pub fn router(state: Arc<AppState>) -> Router {
    let hops = TrustedProxyHops(state.trusted_proxy_hops);
    Router::new()
        // Health endpoints (no rate limit)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .nest("/sso", sso_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(Extension(hops))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .layer(middleware::from_fn(headers::request_id))
        .layer(middleware::from_fn(headers::security_headers))
}

/// SSO routes, each behind its own limiter. Relative paths; mounted at `/sso`.
pub fn sso_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/generate",
            post(handlers::generate).route_layer(middleware::from_fn_with_state(
                state.generate_limiter.clone(),
                rate_limit::enforce,
            )),
        )
        .route(
            "/validate",
            post(handlers::validate).route_layer(middleware::from_fn_with_state(
                state.validate_limiter.clone(),
                rate_limit::enforce,
            )),
        )
}

/// Both endpoints are called cross-origin by browser apps; any origin may
/// call them. No credentials, so a wildcard origin is allowed.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
