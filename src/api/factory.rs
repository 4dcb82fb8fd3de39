//! Resolves the API client a tool handler should use.
//!
//! Handlers call [`ClientFactory::client`] with no credential argument. When
//! the current task runs inside a non-empty
//! [`run_with_credential`](crate::credential::run_with_credential) scope,
//! a fresh client bound to that token is built for the request. Otherwise
//! the shared fallback client is returned, built on first use from the
//! configured (or environment) token and cached for the process lifetime.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::api::client::{ApiClient, ApiEndpoint, DEFAULT_API_HOST};
use crate::api::error::{ApiError, ApiResult};
use crate::config::{ApiConfig, API_HOST_ENV, API_TOKEN_ENV};
use crate::credential::current_credential;

/// Looks up an environment variable. Swappable for tests.
type EnvLookup = fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Produces API clients for tool handlers.
pub struct ClientFactory {
    config: ApiConfig,
    env: EnvLookup,
    endpoint: OnceLock<ApiEndpoint>,
    shared: OnceLock<Arc<ApiClient>>,
}

impl ClientFactory {
    /// Creates a factory that falls back to the process environment for
    /// settings missing from `config`.
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self::with_env(config, process_env)
    }

    /// Creates a factory with a custom environment lookup.
    #[must_use]
    pub fn with_env(config: ApiConfig, env: EnvLookup) -> Self {
        Self {
            config,
            env,
            endpoint: OnceLock::new(),
            shared: OnceLock::new(),
        }
    }

    /// Returns the client for the current request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingToken`] when no request credential is in
    /// scope and no shared token is configured, or any error from building
    /// the client.
    pub fn client(&self) -> ApiResult<Arc<ApiClient>> {
        match current_credential().filter(|c| !c.is_empty()) {
            Some(token) => {
                tracing::trace!("Using request-scoped API client");
                Ok(Arc::new(ApiClient::new(self.endpoint()?, &token)?))
            }
            None => self.shared_client(),
        }
    }

    /// Returns the shared fallback client, building it on first use.
    ///
    /// # Errors
    ///
    /// See [`ClientFactory::client`].
    pub fn shared_client(&self) -> ApiResult<Arc<ApiClient>> {
        if let Some(client) = self.shared.get() {
            return Ok(Arc::clone(client));
        }

        let token = self
            .config
            .token
            .clone()
            .or_else(|| (self.env)(API_TOKEN_ENV))
            .ok_or(ApiError::MissingToken {
                variable: API_TOKEN_ENV,
            })?;

        let endpoint = self.endpoint()?;
        let client = Arc::new(ApiClient::new(endpoint, &token)?);
        tracing::debug!(
            base_url = endpoint.base_url(),
            "Shared API client initialised"
        );

        // A concurrent first call may have won the race; keep whichever landed.
        Ok(Arc::clone(self.shared.get_or_init(|| client)))
    }

    /// Resolves the API endpoint once.
    fn endpoint(&self) -> ApiResult<&ApiEndpoint> {
        if let Some(endpoint) = self.endpoint.get() {
            return Ok(endpoint);
        }

        let host = self
            .config
            .host
            .clone()
            .or_else(|| (self.env)(API_HOST_ENV))
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());
        let endpoint = ApiEndpoint::new(&host, Duration::from_secs(self.config.timeout_secs))?;

        Ok(self.endpoint.get_or_init(|| endpoint))
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint.get())
            .field("shared_initialised", &self.shared.get().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::run_with_credential;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn config_with_token(token: Option<&str>) -> ApiConfig {
        ApiConfig {
            token: token.map(str::to_string),
            host: Some("http://127.0.0.1:9/v1".to_string()),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn missing_token_is_reported() {
        let factory = ClientFactory::with_env(config_with_token(None), no_env);
        let err = factory.client().unwrap_err();
        assert!(matches!(err, ApiError::MissingToken { .. }));
    }

    #[test]
    fn shared_client_is_cached() {
        let factory = ClientFactory::with_env(config_with_token(Some("shared")), no_env);
        let first = factory.client().unwrap();
        let second = factory.client().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn token_falls_back_to_environment() {
        fn env(name: &str) -> Option<String> {
            (name == API_TOKEN_ENV).then(|| "from-env".to_string())
        }

        let factory = ClientFactory::with_env(config_with_token(None), env);
        assert!(factory.client().is_ok());
    }

    #[test]
    fn invalid_host_from_environment_is_reported() {
        fn env(name: &str) -> Option<String> {
            (name == API_HOST_ENV).then(|| "::not a url::".to_string())
        }

        let config = ApiConfig {
            token: Some("shared".to_string()),
            ..ApiConfig::default()
        };
        let factory = ClientFactory::with_env(config, env);
        assert!(matches!(
            factory.client().unwrap_err(),
            ApiError::InvalidHost { .. }
        ));
    }

    #[tokio::test]
    async fn scoped_credential_builds_fresh_client() {
        let factory = ClientFactory::with_env(config_with_token(Some("shared")), no_env);
        let shared = factory.client().unwrap();

        let scoped = run_with_credential("caller", async { factory.client() })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&shared, &scoped));

        let scoped_again = run_with_credential("caller", async { factory.client() })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&scoped, &scoped_again));
    }

    #[tokio::test]
    async fn scoped_credential_works_without_shared_token() {
        let factory = ClientFactory::with_env(config_with_token(None), no_env);
        let result = run_with_credential("caller", async { factory.client() }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn empty_scope_uses_shared_client() {
        let factory = ClientFactory::with_env(config_with_token(Some("shared")), no_env);
        let shared = factory.client().unwrap();
        let scoped = run_with_credential("", async { factory.client() })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&shared, &scoped));
    }
}
