use std::time::Duration;

use bon::Builder;
use reqwest::header::HeaderMap;

use super::retry::RetryPolicy;

/// Environment variable consulted by [`Environment::from_env`].
pub const ENVIRONMENT_VAR: &str = "COURIER_ENV";

const PRODUCTION_TIMEOUT: Duration = Duration::from_secs(30);
const DEVELOPMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deployment flavour. Production tolerates slower backends.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Reads [`ENVIRONMENT_VAR`]; anything other than `production` (case-insensitive) is
    /// treated as development.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(value) if value.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }

    #[must_use]
    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::Production => PRODUCTION_TIMEOUT,
            Self::Development => DEVELOPMENT_TIMEOUT,
        }
    }
}

/// Configuration for [`super::Client`].
#[derive(Clone, Debug, Default, Builder)]
pub struct Config {
    /// Picks the default request timeout.
    #[builder(default)]
    pub(crate) environment: Environment,
    /// Overrides the environment's timeout for every call.
    pub(crate) timeout: Option<Duration>,
    #[builder(default)]
    pub(crate) retry: RetryPolicy,
}

impl Config {
    /// The timeout applied when a call does not override it.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| self.environment.default_timeout())
    }

    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

/// Per-call overrides.
#[derive(Clone, Debug, Default, Builder)]
pub struct RequestOptions {
    /// Merged over the default headers; same-named headers replace the default.
    #[builder(default)]
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
}
