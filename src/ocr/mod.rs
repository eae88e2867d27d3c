//! OCR provider adapters and result normalization.

mod api_backend;
mod azure;
mod backend;
mod chat;
pub mod confidence;
mod llamaparse;
mod mistral;
pub mod normalize;
mod openai;

use std::sync::Arc;
use std::time::Duration;

pub use azure::AzureDocumentIntelligenceProvider;
pub use backend::{
    DocumentInput, OcrError, OcrOutcome, OcrProvider, OcrProviderKind, ProviderRegistry,
};
pub use llamaparse::LlamaParseProvider;
pub use mistral::MistralProvider;
pub use normalize::ExtractedInvoice;
pub use openai::OpenAiVisionProvider;

use crate::config::OcrSettings;

/// Build a registry with every provider, configured from settings.
///
/// Providers without credentials are still registered so they can report
/// what is missing.
pub fn registry_from_settings(settings: &OcrSettings) -> ProviderRegistry {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let mut registry = ProviderRegistry::new(settings.default_provider);

    let mut openai = OpenAiVisionProvider::new()
        .with_model(settings.openai_model.clone())
        .with_timeout(timeout);
    if let Some(key) = &settings.openai_api_key {
        openai = openai.with_api_key(key.clone());
    }
    if let Some(url) = &settings.openai_base_url {
        openai = openai.with_base_url(url.clone());
    }
    registry.register(Arc::new(openai));

    let mut mistral = MistralProvider::new()
        .with_model(settings.mistral_model.clone())
        .with_timeout(timeout);
    if let Some(key) = &settings.mistral_api_key {
        mistral = mistral.with_api_key(key.clone());
    }
    registry.register(Arc::new(mistral));

    let mut azure = AzureDocumentIntelligenceProvider::new()
        .with_model(settings.azure_model.clone())
        .with_polling(
            Duration::from_millis(settings.poll_interval_ms),
            settings.max_polls,
        );
    if let Some(endpoint) = &settings.azure_endpoint {
        azure = azure.with_endpoint(endpoint.clone());
    }
    if let Some(key) = &settings.azure_api_key {
        azure = azure.with_api_key(key.clone());
    }
    registry.register(Arc::new(azure));

    let mut llama = LlamaParseProvider::new()
        .with_structuring_model(settings.structuring_model.clone())
        .with_polling(
            Duration::from_millis(settings.poll_interval_ms),
            settings.max_polls,
        );
    if let Some(key) = &settings.llama_cloud_api_key {
        llama = llama.with_api_key(key.clone());
    }
    if let Some(key) = &settings.openai_api_key {
        llama = llama.with_openai_api_key(key.clone());
    }
    registry.register(Arc::new(llama));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_settings_registers_all() {
        let settings = OcrSettings {
            default_provider: OcrProviderKind::Azure,
            mistral_api_key: Some("m".to_string()),
            ..OcrSettings::default()
        };
        let registry = registry_from_settings(&settings);

        assert_eq!(registry.providers().count(), OcrProviderKind::ALL.len());
        assert_eq!(registry.default_kind(), OcrProviderKind::Azure);
        assert!(registry.get(OcrProviderKind::Mistral).unwrap().is_available());
    }
}
