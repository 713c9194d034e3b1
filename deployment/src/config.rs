//! Orchestrator connection configuration.
//!
//! The rest of the library never reads the process environment; everything
//! required is collected and validated here once, so precondition failures
//! surface before any network call is attempted.

use crate::error::DeployError;

/// Environment variable carrying the orchestrator API host URL.
pub const API_HOST_ENV: &str = "FLEET_API_HOST";
/// Environment variable carrying the orchestrator API token.
pub const API_TOKEN_ENV: &str = "FLEET_API_TOKEN";
/// Accepted alias for [`API_TOKEN_ENV`]; treated identically.
pub const API_TOKEN_ALIAS_ENV: &str = "FLEET_API_KEY";

/// Validated connection details for the orchestrator's node API.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub api_host: String,
    pub api_token: String,
}

impl OrchestratorConfig {
    /// Build a config from explicit values, rejecting empty ones.
    pub fn new(
        api_host: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let api_host = api_host.into();
        let api_token = api_token.into();
        if api_host.trim().is_empty() {
            return Err(DeployError::MissingConfig(format!(
                "orchestrator API host ({API_HOST_ENV})"
            )));
        }
        if api_token.trim().is_empty() {
            return Err(DeployError::MissingConfig(format!(
                "orchestrator API token ({API_TOKEN_ENV} or {API_TOKEN_ALIAS_ENV})"
            )));
        }
        Ok(Self {
            api_host,
            api_token,
        })
    }

    /// Collect and validate the config from the process environment.
    pub fn from_env() -> Result<Self, DeployError> {
        Self::resolve(
            std::env::var(API_HOST_ENV).ok(),
            std::env::var(API_TOKEN_ENV).ok(),
            std::env::var(API_TOKEN_ALIAS_ENV).ok(),
        )
    }

    fn resolve(
        host: Option<String>,
        token: Option<String>,
        token_alias: Option<String>,
    ) -> Result<Self, DeployError> {
        let host = host.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            DeployError::MissingConfig(format!("orchestrator API host ({API_HOST_ENV})"))
        })?;
        let token = token
            .filter(|v| !v.trim().is_empty())
            .or(token_alias.filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                DeployError::MissingConfig(format!(
                    "orchestrator API token ({API_TOKEN_ENV} or {API_TOKEN_ALIAS_ENV})"
                ))
            })?;
        Self::new(host, token)
    }

    /// The API base URL with a scheme and no trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.api_host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        }
    }
}
