use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use courier_api::conversation::ThreadLimits;
use courier_api::unread::CacheScope;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub unread_cache_ttl: Duration,
    pub unread_cache_scope: CacheScope,
    pub thread_limits: ThreadLimits,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder");
        }

        let defaults = ThreadLimits::default();

        Ok(Self {
            jwt_secret,
            db_path: get("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            host: get("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "COURIER_PORT", 3000)?,
            unread_cache_ttl: Duration::from_secs(parse_or(&get, "COURIER_UNREAD_CACHE_TTL_SECS", 60)?),
            unread_cache_scope: match get("COURIER_UNREAD_CACHE_SCOPE") {
                Some(raw) => raw.parse()?,
                None => CacheScope::default(),
            },
            thread_limits: ThreadLimits {
                max_nodes: parse_or(&get, "COURIER_THREAD_MAX_NODES", defaults.max_nodes)?,
                max_depth: parse_or(&get, "COURIER_THREAD_MAX_DEPTH", defaults.max_depth)?,
            },
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
