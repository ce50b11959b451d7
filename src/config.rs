//! Mux configuration loaded from environment variables.
//!
//! All settings have defaults suitable for development. In production,
//! configure via environment variables or a `.env` file.
//!
//! - `MAX_REQUEST_BODY_SIZE`: Maximum buffered request body in bytes (default: 10MB)
//! - `REQUEST_TIMEOUT_MS`: Deadline attached to every request context (default: 0 = none)
//! - `NOT_FOUND_MESSAGE`: Error text of the default 404 body (default: "Route not found")

use std::env;
use std::time::Duration;

use crate::error::{MuxError, MuxResult};

/// Default error text written when no route matches.
pub const DEFAULT_NOT_FOUND_MESSAGE: &str = "Route not found";

/// Router adapter configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = MuxConfig::from_env()?;
/// let mux = Mux::with_config(config);
/// ```
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Maximum request body size in bytes buffered before dispatch (default: 10MB)
    pub max_request_body_size: usize,

    /// Server-side deadline for each request context (zero disables it).
    /// A valid `X-Request-Timeout` header may only shorten it.
    pub request_timeout: Duration,

    /// Message of the `{"error": ...}` body written by the default 404 handler
    pub not_found_message: String,
}

impl MuxConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `MuxError::ConfigError` if a value cannot be parsed or fails
    /// validation.
    pub fn from_env() -> MuxResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?,
            request_timeout: Duration::from_millis(Self::parse_env("REQUEST_TIMEOUT_MS", 0)?),
            not_found_message: env::var("NOT_FOUND_MESSAGE")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NOT_FOUND_MESSAGE.to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> MuxResult<()> {
        if self.max_request_body_size == 0 {
            return Err(MuxError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Server-side request deadline, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }

    fn parse_env<T>(name: &str, default: T) -> MuxResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| MuxError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: Duration::ZERO,
            not_found_message: DEFAULT_NOT_FOUND_MESSAGE.to_string(),
        }
    }
}
