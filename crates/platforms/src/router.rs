//! Platform router — resolves the client for a rule's ads platform.

use std::collections::HashMap;
use std::sync::Arc;

use autopilot_core::types::AdPlatform;
use tracing::info;

use crate::clients::{AdsPlatform, PlatformError, SimulatedAdsClient};

#[derive(Clone, Default)]
pub struct PlatformRouter {
    clients: HashMap<AdPlatform, Arc<dyn AdsPlatform>>,
}

impl PlatformRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router backed by a simulated client for every platform.
    pub fn simulated() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(SimulatedAdsClient::meta()));
        router.register(Arc::new(SimulatedAdsClient::google()));
        router.register(Arc::new(SimulatedAdsClient::tiktok()));
        info!(platforms = router.clients.len(), "Platform router initialized");
        router
    }

    /// Registers a client, replacing any previous client for its platform.
    pub fn register(&mut self, client: Arc<dyn AdsPlatform>) {
        self.clients.insert(client.platform(), client);
    }

    pub fn with_client(mut self, client: Arc<dyn AdsPlatform>) -> Self {
        self.register(client);
        self
    }

    pub fn client(&self, platform: AdPlatform) -> Result<Arc<dyn AdsPlatform>, PlatformError> {
        self.clients
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::NotConfigured(platform))
    }

    pub fn platforms(&self) -> Vec<AdPlatform> {
        let mut platforms: Vec<AdPlatform> = self.clients.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}
