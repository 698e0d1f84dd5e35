//! SSO Gateway: library crate.
//!
//! Issues short-lived HMAC-signed tokens that let a user authenticated in one
//! application act on a second, trusted application, and validates them on
//! the receiving side. The binary in `main.rs` wires these modules to the
//! environment; integration tests in `tests/` drive them directly.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod directory;
pub mod errors;
pub mod keys;
pub mod middleware;
pub mod telemetry;
pub mod token;

use config::Config;
use directory::UserDirectory;
use keys::KeyProvider;
use middleware::rate_limit::{FixedWindowLimiter, RateLimiter};
use token::{TokenIssuer, TokenValidator};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub issuer: TokenIssuer,
    pub validator: TokenValidator,
    pub generate_limiter: Arc<dyn RateLimiter>,
    pub validate_limiter: Arc<dyn RateLimiter>,
    /// Proxies in front of the gateway; see `middleware::client`.
    pub trusted_proxy_hops: usize,
}

impl AppState {
    /// Production wiring: in-memory fixed-window limiters sized from config.
    pub fn new(
        cfg: &Config,
        keys: Arc<dyn KeyProvider>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            issuer: TokenIssuer::new(keys.clone(), directory, cfg.max_ttl_secs),
            validator: TokenValidator::new(keys),
            generate_limiter: Arc::new(FixedWindowLimiter::with_max_keys(
                cfg.generate_limit,
                cfg.rate_limit_max_keys,
            )),
            validate_limiter: Arc::new(FixedWindowLimiter::with_max_keys(
                cfg.validate_limit,
                cfg.rate_limit_max_keys,
            )),
            trusted_proxy_hops: cfg.trusted_proxy_hops,
        }
    }
}
