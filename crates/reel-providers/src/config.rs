//! Provider endpoints and transfer settings.

use std::time::Duration;

use reel_models::BackendId;

/// One provider's API endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Read `{PREFIX}_API_URL` / `{PREFIX}_API_KEY`. `None` when the URL is unset.
    fn from_env(prefix: &str) -> Option<Self> {
        let base_url = std::env::var(format!("{}_API_URL", prefix))
            .ok()
            .filter(|u| !u.is_empty())?;
        let api_key = std::env::var(format!("{}_API_KEY", prefix)).unwrap_or_default();
        Some(Self::new(base_url, api_key))
    }
}

/// Capped exponential backoff for artifact downloads.
#[derive(Debug, Clone)]
pub struct FetchRetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl FetchRetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("FETCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            base_delay: std::env::var("FETCH_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: std::env::var("FETCH_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub presenter: Option<EndpointConfig>,
    pub cinematic: Option<EndpointConfig>,
    pub clip: Option<EndpointConfig>,
    /// Per-request timeout for submit and poll calls.
    pub timeout: Duration,
    pub fetch: FetchRetryConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            presenter: None,
            cinematic: None,
            clip: None,
            timeout: Duration::from_secs(30),
            fetch: FetchRetryConfig::default(),
        }
    }
}

impl ProvidersConfig {
    pub fn from_env() -> Self {
        Self {
            presenter: EndpointConfig::from_env("PRESENTER"),
            cinematic: EndpointConfig::from_env("CINEMATIC"),
            clip: EndpointConfig::from_env("CLIP"),
            timeout: Duration::from_secs(
                std::env::var("PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            fetch: FetchRetryConfig::from_env(),
        }
    }

    pub fn endpoint(&self, backend: BackendId) -> Option<&EndpointConfig> {
        match backend {
            BackendId::Presenter => self.presenter.as_ref(),
            BackendId::Cinematic => self.cinematic.as_ref(),
            BackendId::Clip => self.clip.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_backoff_is_capped() {
        let config = FetchRetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[test]
    #[serial]
    fn test_unset_endpoint_is_absent() {
        std::env::remove_var("CLIP_API_URL");
        std::env::set_var("CINEMATIC_API_URL", "https://cinematic.example/");
        std::env::set_var("CINEMATIC_API_KEY", "k");

        let config = ProvidersConfig::from_env();
        assert!(config.clip.is_none());
        assert_eq!(
            config.endpoint(BackendId::Cinematic).unwrap().base_url,
            "https://cinematic.example"
        );

        std::env::remove_var("CINEMATIC_API_URL");
        std::env::remove_var("CINEMATIC_API_KEY");
    }
}
