//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `ZALO_VERIFY_ENDPOINT` - Backend endpoint that verifies host login tokens
//! - `ZALO_VERIFY_TIMEOUT_SECS` - Verification request timeout (default: 10)
//! - `PROFILE_UPSERT_RPC` - Server-side profile upsert function (default: none)
//! - `PROFILE_CACHE_TTL_SECS` - How long canonical profiles stay cached (default: 300)
//! - `SHIPPING_FEE` - Flat shipping fee in VND (default: 30000)
//! - `STOREFRONT_SESSION_FILE` - Session marker file (default: .zalo-shop/session.json)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag
//! - `SENTRY_SAMPLE_RATE` - Error sample rate, 0.0-1.0 (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate, 0.0-1.0 (default: 0.1)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;
use zalo_shop_core::Money;

const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROFILE_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_SHIPPING_FEE: i64 = 30_000;
const DEFAULT_SESSION_FILE: &str = ".zalo-shop/session.json";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Backend token verification, when configured
    pub verify: Option<VerifyConfig>,
    /// Name of the server-side profile upsert function, when the database has one
    pub profile_upsert_rpc: Option<String>,
    /// Time-to-live of cached canonical profiles
    pub profile_cache_ttl: Duration,
    /// Flat shipping fee added to every order
    pub shipping_fee: Money,
    /// File holding the durable session marker
    pub session_file: PathBuf,
    /// Error tracking configuration
    pub sentry: SentryConfig,
}

/// Backend verification endpoint configuration.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Endpoint receiving `POST {token}`
    pub endpoint: Url,
    /// Request timeout
    pub timeout: Duration,
}

/// Sentry configuration.
///
/// Implements `Debug` manually to redact the DSN.
#[derive(Clone, Default)]
pub struct SentryConfig {
    /// Sentry DSN; error tracking is disabled when absent
    pub dsn: Option<String>,
    /// Environment tag attached to events
    pub environment: Option<String>,
    /// Fraction of error events sent
    pub sample_rate: f32,
    /// Fraction of transactions traced
    pub traces_sample_rate: f32,
}

impl std::fmt::Debug for SentryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentryConfig")
            .field("dsn", &self.dsn.as_ref().map(|_| "[REDACTED]"))
            .field("environment", &self.environment)
            .field("sample_rate", &self.sample_rate)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let verify = VerifyConfig::from_env()?;

        let profile_upsert_rpc = get_optional_env("PROFILE_UPSERT_RPC")
            .map(|name| validate_identifier("PROFILE_UPSERT_RPC", &name).map(|()| name))
            .transpose()?;

        let profile_cache_ttl = Duration::from_secs(parse_env_or_default(
            "PROFILE_CACHE_TTL_SECS",
            DEFAULT_PROFILE_CACHE_TTL_SECS,
        )?);

        let shipping_fee: i64 = parse_env_or_default("SHIPPING_FEE", DEFAULT_SHIPPING_FEE)?;
        if shipping_fee < 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SHIPPING_FEE".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let session_file =
            PathBuf::from(get_env_or_default("STOREFRONT_SESSION_FILE", DEFAULT_SESSION_FILE));

        Ok(Self {
            database_url,
            verify,
            profile_upsert_rpc,
            profile_cache_ttl,
            shipping_fee: Money::vnd(shipping_fee),
            session_file,
            sentry: SentryConfig::from_env()?,
        })
    }
}

impl VerifyConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(raw) = get_optional_env("ZALO_VERIFY_ENDPOINT") else {
            return Ok(None);
        };

        let endpoint = parse_endpoint("ZALO_VERIFY_ENDPOINT", &raw)?;
        let timeout = Duration::from_secs(parse_env_or_default(
            "ZALO_VERIFY_TIMEOUT_SECS",
            DEFAULT_VERIFY_TIMEOUT_SECS,
        )?);

        Ok(Some(Self { endpoint, timeout }))
    }
}

impl SentryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            dsn: get_optional_env("SENTRY_DSN"),
            environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sample_rate: parse_rate("SENTRY_SAMPLE_RATE", 1.0)?,
            traces_sample_rate: parse_rate("SENTRY_TRACES_SAMPLE_RATE", 0.1)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Some(value) = get_optional_env(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Some(value) = get_optional_env("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Blank values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a sample rate in `0.0..=1.0`.
fn parse_rate(key: &str, default: f32) -> Result<f32, ConfigError> {
    let rate = parse_env_or_default(key, default)?;
    check_rate(key, rate)
}

fn check_rate(key: &str, rate: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("must be between 0.0 and 1.0 (got {rate})"),
        ))
    }
}

/// Parse an HTTP(S) endpoint URL.
fn parse_endpoint(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url: Url = parse_value(key, raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{other}'"),
        )),
    }
}

/// Validate a plain SQL identifier, optionally schema-qualified (`schema.name`).
///
/// The function name is spliced into SQL text, so anything beyond
/// ASCII letters, digits and underscores is rejected.
fn validate_identifier(key: &str, name: &str) -> Result<(), ConfigError> {
    let valid_part = |part: &str| {
        part.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|part| valid_part(part)) {
        Ok(())
    } else {
        Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("'{name}' is not a valid SQL identifier"),
        ))
    }
}
