//! Backend → adapter lookup, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use reel_models::BackendId;
use tracing::{info, warn};

use crate::adapter::GenerationAdapter;
use crate::adapters::{CinematicAdapter, ClipAdapter, PresenterAdapter};
use crate::config::ProvidersConfig;
use crate::error::{ProviderError, ProviderResult};

/// Immutable map of configured adapters.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<BackendId, Arc<dyn GenerationAdapter>>,
}

impl AdapterRegistry {
    /// Register an adapter for every backend with a configured endpoint.
    pub fn from_config(config: &ProvidersConfig) -> ProviderResult<Self> {
        let mut registry = Self::default();

        for backend in BackendId::ALL {
            let Some(endpoint) = config.endpoint(backend).cloned() else {
                warn!(backend = %backend, "No endpoint configured; jobs for this backend will fail");
                continue;
            };
            let adapter: Arc<dyn GenerationAdapter> = match backend {
                BackendId::Presenter => Arc::new(PresenterAdapter::new(endpoint, config.timeout)?),
                BackendId::Cinematic => Arc::new(CinematicAdapter::new(endpoint, config.timeout)?),
                BackendId::Clip => Arc::new(ClipAdapter::new(endpoint, config.timeout)?),
            };
            registry = registry.with_adapter(adapter);
        }

        info!(backends = ?registry.backends(), "Adapter registry ready");
        Ok(registry)
    }

    /// Add or replace the adapter for its backend. Used while building.
    pub fn with_adapter(mut self, adapter: Arc<dyn GenerationAdapter>) -> Self {
        self.adapters.insert(adapter.backend(), adapter);
        self
    }

    pub fn get(&self, backend: BackendId) -> ProviderResult<Arc<dyn GenerationAdapter>> {
        self.adapters
            .get(&backend)
            .cloned()
            .ok_or(ProviderError::NotConfigured(backend))
    }

    pub fn backends(&self) -> Vec<BackendId> {
        let mut backends: Vec<BackendId> = self.adapters.keys().copied().collect();
        backends.sort();
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[test]
    fn test_registry_only_has_configured_backends() {
        let config = ProvidersConfig {
            cinematic: Some(EndpointConfig::new("http://localhost:1", "k")),
            ..Default::default()
        };
        let registry = AdapterRegistry::from_config(&config).unwrap();

        assert_eq!(registry.backends(), vec![BackendId::Cinematic]);
        assert_eq!(registry.get(BackendId::Cinematic).unwrap().backend(), BackendId::Cinematic);
        assert!(matches!(
            registry.get(BackendId::Clip),
            Err(ProviderError::NotConfigured(BackendId::Clip))
        ));
    }
}
