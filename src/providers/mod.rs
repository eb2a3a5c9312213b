//! Upstream provider integrations
//!
//! Each provider implements [`ProviderClient`] and is registered under its
//! stable key. The registry is built once from configuration and injected
//! wherever provider lookups happen; handlers and the scheduler never
//! construct clients themselves.

pub mod broker;
pub mod client;
pub mod vimeo;

pub use client::{
    FetchRequest, PageCursor, ProviderClient, ProviderDescriptor, ProviderError, RecordPage,
    UpstreamRecord,
};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProvidersConfig;
use broker::BrokerClient;
use vimeo::VimeoClient;

pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Builds the registry from configuration. Vimeo is always available
    /// (optionally against a custom base); the broker integration only
    /// activates when its base URL is configured.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();
        let vimeo = match config.vimeo_base_url.as_deref() {
            Some(base) => VimeoClient::with_base_url(base),
            None => VimeoClient::new(),
        };
        registry.register(Arc::new(vimeo));
        if let Some(base) = config.broker_base_url.as_deref() {
            registry.register(Arc::new(BrokerClient::new(base)));
        }
        registry
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.descriptor().key, client);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.clients.contains_key(key)
    }

    /// All registered descriptors, ordered by key for stable API output.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<_> = self
            .clients
            .values()
            .map(|client| client.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
