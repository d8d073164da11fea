use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderKind, Settings};
use crate::error::{GatewayError, Result};
use crate::http_client::client_for_provider;
use crate::providers::{
    AnthropicAdapter, GoogleAdapter, OpenAIAdapter, OpenRouterAdapter, ProviderAdapter,
};
use crate::server::storage_traits::TextExtractor;
use crate::server::util::mask_key;

/// One adapter per configured provider kind, built once at start-up.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn from_settings(settings: &Settings, extractor: Arc<dyn TextExtractor>) -> Result<Self> {
        let mut registry = Self::default();
        for kind in ProviderKind::ALL {
            let provider = settings.provider_for_kind(kind);
            let Some(api_key) = provider.resolve_api_key() else {
                tracing::info!("provider {} has no API key, not registered", kind);
                continue;
            };
            let client = client_for_provider(&provider)?;
            let base_url = provider.effective_base_url();
            // 新增 ProviderKind 时编译器会要求在此注册
            let adapter: Arc<dyn ProviderAdapter> = match kind {
                ProviderKind::OpenAI => Arc::new(OpenAIAdapter::new(
                    client,
                    base_url.clone(),
                    api_key.clone(),
                    extractor.clone(),
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(
                    client,
                    base_url.clone(),
                    api_key.clone(),
                    extractor.clone(),
                )),
                ProviderKind::Google => Arc::new(GoogleAdapter::new(
                    client,
                    base_url.clone(),
                    api_key.clone(),
                    extractor.clone(),
                )),
                ProviderKind::OpenRouter => Arc::new(OpenRouterAdapter::new(
                    client,
                    base_url.clone(),
                    api_key.clone(),
                    extractor.clone(),
                )),
            };
            tracing::info!(
                "registered provider {} at {} (key {})",
                kind,
                base_url,
                mask_key(&api_key)
            );
            registry.adapters.insert(kind, adapter);
        }
        Ok(registry)
    }

    /// Registers or replaces the adapter for its kind.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(GatewayError::ProviderNotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }
}
