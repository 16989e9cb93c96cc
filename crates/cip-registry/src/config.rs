//! Configuration types for the registry client.

use std::time::Duration;

use url::Url;

use crate::error::RegistryError;
use crate::retry::RetryPolicy;

/// Configuration for the registry client.
///
/// Registry names carry their own host (`gcr.io/project`), so there is no
/// single base URL. By default requests go to `https://<host>`; an
/// endpoint override sends every request to one base URL instead, which is
/// how local mirrors and tests are wired up.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL used instead of `https://<host>`, if set.
    pub endpoint: Option<String>,

    /// Authentication configuration.
    pub auth: RegistryAuth,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Retry policy for retryable failures.
    pub retry: RetryPolicy,

    /// User agent string.
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth: RegistryAuth::None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            user_agent: format!("cip-registry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RegistryConfig {
    /// Creates a configuration with defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use cip_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new();
    /// assert_eq!(config.timeout, Duration::from_secs(60));
    /// assert!(config.endpoint.is_none());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends every request to `endpoint` instead of `https://<host>`.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the authentication method.
    #[must_use]
    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the base URL for a registry host.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidUrl`] if the result does not parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_registry::RegistryConfig;
    ///
    /// let url = RegistryConfig::new().base_url("gcr.io").unwrap();
    /// assert_eq!(url.as_str(), "https://gcr.io/");
    ///
    /// let url = RegistryConfig::new()
    ///     .with_endpoint("http://127.0.0.1:5000")
    ///     .base_url("gcr.io")
    ///     .unwrap();
    /// assert_eq!(url.as_str(), "http://127.0.0.1:5000/");
    /// ```
    pub fn base_url(&self, host: &str) -> Result<Url, RegistryError> {
        let raw = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{host}"));
        Url::parse(&raw).map_err(|_| RegistryError::InvalidUrl { url: raw })
    }
}

/// Authentication methods for registry access.
#[derive(Debug, Clone, Default)]
pub enum RegistryAuth {
    /// No authentication.
    #[default]
    None,

    /// Basic authentication (username/password or username/token).
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// Bearer token authentication (`OAuth2` access token of a service account).
    Bearer {
        /// Token value.
        token: String,
    },
}

impl RegistryAuth {
    /// Creates basic authentication.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_registry::RegistryAuth;
    ///
    /// let auth = RegistryAuth::bearer("ya29.token");
    /// assert!(matches!(auth, RegistryAuth::Bearer { .. }));
    /// ```
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RegistryConfig::new();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(matches!(config.auth, RegistryAuth::None));
        assert!(config.user_agent.starts_with("cip-registry/"));
        assert_eq!(config.retry.max_attempts, 45);
    }

    #[test]
    fn test_base_url_invalid_endpoint() {
        let config = RegistryConfig::new().with_endpoint("not a url");
        assert!(matches!(
            config.base_url("gcr.io"),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_basic_auth() {
        let auth = RegistryAuth::basic("user", "pass");
        assert!(matches!(
            auth,
            RegistryAuth::Basic { username, password }
            if username == "user" && password == "pass"
        ));
    }

    #[test]
    fn test_builder_chain() {
        let config = RegistryConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryPolicy::none())
            .with_auth(RegistryAuth::bearer("t"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 1);
    }
}
