use std::time::Duration;

use thiserror::Error;

use crate::keys::SECRET_ENV_VAR;
use crate::middleware::rate_limit::parse_window;

/// Startup-time configuration failures. Any of these aborts the process
/// before a single request is served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SSO_SECRET_KEY is not set; refusing to start without a signing secret")]
    MissingSecret,

    #[error("no user directory configured: set DATABASE_URL or SSO_USERS_FILE")]
    MissingDirectory,

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Where issuance resolves user ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySource {
    Postgres(String),
    File(String),
}

/// Fixed-window quota for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub signing_secret: String,
    pub directory: DirectorySource,
    /// Upper bound for `expires_in` on issuance, in seconds.
    /// Set via SSO_MAX_TTL_SECS. Default: 86400.
    pub max_ttl_secs: u64,
    /// Issuance quota. Set via SSO_GENERATE_RATE_LIMIT / SSO_GENERATE_RATE_WINDOW ("15m").
    pub generate_limit: RateLimitPolicy,
    /// Validation quota. Set via SSO_VALIDATE_RATE_LIMIT / SSO_VALIDATE_RATE_WINDOW ("15m").
    pub validate_limit: RateLimitPolicy,
    /// Maximum number of tracked caller identifiers per limiter.
    pub rate_limit_max_keys: usize,
    /// Reverse proxies whose X-Forwarded-For entries are believed.
    /// Set via SSO_TRUSTED_PROXY_HOPS. Default: 0 (key on the TCP peer).
    pub trusted_proxy_hops: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("signing_secret", &"<redacted>")
            .field(
                "directory",
                &match &self.directory {
                    DirectorySource::Postgres(_) => "postgres".to_string(),
                    DirectorySource::File(path) => format!("file:{}", path),
                },
            )
            .field("max_ttl_secs", &self.max_ttl_secs)
            .field("generate_limit", &self.generate_limit)
            .field("validate_limit", &self.validate_limit)
            .field("rate_limit_max_keys", &self.rate_limit_max_keys)
            .field("trusted_proxy_hops", &self.trusted_proxy_hops)
            .finish()
    }
}

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_TTL_SECS: u64 = 86_400;
pub const DEFAULT_GENERATE_LIMIT: RateLimitPolicy = RateLimitPolicy::new(10, 15 * 60);
pub const DEFAULT_VALIDATE_LIMIT: RateLimitPolicy = RateLimitPolicy::new(100, 15 * 60);
pub const DEFAULT_RATE_LIMIT_MAX_KEYS: usize = 100_000;

impl Config {
    /// Build a config from an arbitrary variable lookup. `load()` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let signing_secret = lookup(SECRET_ENV_VAR)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let directory = match (
            lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            lookup("SSO_USERS_FILE").filter(|s| !s.trim().is_empty()),
        ) {
            (Some(url), _) => DirectorySource::Postgres(url),
            (None, Some(path)) => DirectorySource::File(path),
            (None, None) => return Err(ConfigError::MissingDirectory),
        };

        let generate_limit = RateLimitPolicy {
            max_requests: parse_or(
                &lookup,
                "SSO_GENERATE_RATE_LIMIT",
                DEFAULT_GENERATE_LIMIT.max_requests,
            )?,
            window: window_or(&lookup, "SSO_GENERATE_RATE_WINDOW", DEFAULT_GENERATE_LIMIT.window)?,
        };
        let validate_limit = RateLimitPolicy {
            max_requests: parse_or(
                &lookup,
                "SSO_VALIDATE_RATE_LIMIT",
                DEFAULT_VALIDATE_LIMIT.max_requests,
            )?,
            window: window_or(&lookup, "SSO_VALIDATE_RATE_WINDOW", DEFAULT_VALIDATE_LIMIT.window)?,
        };

        let max_ttl_secs = parse_or(&lookup, "SSO_MAX_TTL_SECS", DEFAULT_MAX_TTL_SECS)?;
        if max_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "SSO_MAX_TTL_SECS",
                value: "0".into(),
            });
        }

        Ok(Config {
            port: parse_or(&lookup, "SSO_PORT", DEFAULT_PORT)?,
            signing_secret,
            directory,
            max_ttl_secs,
            generate_limit,
            validate_limit,
            rate_limit_max_keys: parse_or(
                &lookup,
                "SSO_RATE_LIMIT_MAX_KEYS",
                DEFAULT_RATE_LIMIT_MAX_KEYS,
            )?,
            trusted_proxy_hops: parse_or(&lookup, "SSO_TRUSTED_PROXY_HOPS", 0)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

fn window_or<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => parse_window(&raw).ok_or(ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Load configuration from `.env` (if present) and the process environment.
pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Ok(Config::from_lookup(|k| std::env::var(k).ok())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let err = Config::from_lookup(lookup(&[("SSO_USERS_FILE", "users.json")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingSecret);
    }

    #[test]
    fn test_blank_secret_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "   "),
            ("SSO_USERS_FILE", "users.json"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingSecret);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let err = Config::from_lookup(lookup(&[("SSO_SECRET_KEY", "s3cret")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDirectory);
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.directory, DirectorySource::File("users.json".into()));
        assert_eq!(cfg.generate_limit, RateLimitPolicy::new(10, 900));
        assert_eq!(cfg.validate_limit, RateLimitPolicy::new(100, 900));
        assert_eq!(cfg.max_ttl_secs, 86_400);
        assert_eq!(cfg.trusted_proxy_hops, 0);
    }

    #[test]
    fn test_trusted_proxy_hops() {
        let cfg = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
            ("SSO_TRUSTED_PROXY_HOPS", "2"),
        ]))
        .unwrap();
        assert_eq!(cfg.trusted_proxy_hops, 2);

        let err = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
            ("SSO_TRUSTED_PROXY_HOPS", "-1"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "SSO_TRUSTED_PROXY_HOPS", .. }
        ));
    }

    #[test]
    fn test_database_wins_over_file() {
        let cfg = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/sso"),
            ("SSO_USERS_FILE", "users.json"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.directory,
            DirectorySource::Postgres("postgres://localhost/sso".into())
        );
    }

    #[test]
    fn test_window_formats() {
        let cfg = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
            ("SSO_GENERATE_RATE_LIMIT", "3"),
            ("SSO_GENERATE_RATE_WINDOW", "1m"),
            ("SSO_VALIDATE_RATE_WINDOW", "120"),
        ]))
        .unwrap();
        assert_eq!(cfg.generate_limit, RateLimitPolicy::new(3, 60));
        assert_eq!(cfg.validate_limit, RateLimitPolicy::new(100, 120));

        let err = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
            ("SSO_VALIDATE_RATE_WINDOW", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "SSO_VALIDATE_RATE_WINDOW", .. }
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cfg = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "hunter2-signing-key"),
            ("SSO_USERS_FILE", "users.json"),
        ]))
        .unwrap();
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("file:users.json"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("SSO_SECRET_KEY", "s3cret"),
            ("SSO_USERS_FILE", "users.json"),
            ("SSO_GENERATE_RATE_LIMIT", "ten"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "SSO_GENERATE_RATE_LIMIT", .. }
        ));
    }
}
