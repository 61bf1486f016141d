use std::time::Duration;

use anyhow::{Context, Result};

/// Default service location when `TSRNG_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Heavy batteries can run for minutes, so the default is generous.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for the round service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base URL without trailing slash, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Per-request timeout enforced by the transport.
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let base_url =
            std::env::var("TSRNG_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let timeout_secs = std::env::var("TSRNG_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self::new(base_url, Duration::from_secs(timeout_secs))
    }
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Apply CLI overrides on top of the environment defaults.
    pub fn with_overrides(mut self, base_url: Option<String>, timeout_secs: Option<u64>) -> Self {
        if let Some(url) = base_url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Join a service path (leading slash) onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Build the shared reqwest client with the configured timeout.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .with_context(|| format!("Failed to build HTTP client for {}", self.base_url))
    }
}

/// Check if the round service is reachable (GET `/`).
pub async fn check_service(config: &ServiceConfig) -> bool {
    match reqwest::Client::new()
        .get(config.endpoint("/"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let cfg = ServiceConfig::new("http://rng.local:9000/", Duration::from_secs(3));
        assert_eq!(cfg.base_url, "http://rng.local:9000");
        assert_eq!(
            cfg.endpoint("/rounds/abc/finalize"),
            "http://rng.local:9000/rounds/abc/finalize"
        );
    }

    #[test]
    fn overrides_replace_defaults() {
        let cfg = ServiceConfig::new(DEFAULT_API_URL, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .with_overrides(Some("http://other:1/".into()), Some(7));
        assert_eq!(cfg.base_url, "http://other:1");
        assert_eq!(cfg.timeout, Duration::from_secs(7));
    }

    #[test]
    fn missing_overrides_keep_values() {
        let cfg = ServiceConfig::new("http://a", Duration::from_secs(1)).with_overrides(None, None);
        assert_eq!(cfg, ServiceConfig::new("http://a", Duration::from_secs(1)));
    }
}
