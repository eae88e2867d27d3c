//! OCR provider listing.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use super::super::AppState;
use crate::ocr::{OcrProviderKind, ProviderRegistry};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: OcrProviderKind,
    pub name: &'static str,
    pub available: bool,
    pub hint: String,
    pub is_default: bool,
}

/// Availability of every registered provider.
pub fn provider_infos(registry: &ProviderRegistry) -> Vec<ProviderInfo> {
    registry
        .providers()
        .map(|p| ProviderInfo {
            id: p.kind(),
            name: p.kind().display_name(),
            available: p.is_available(),
            hint: p.availability_hint(),
            is_default: p.kind() == registry.default_kind(),
        })
        .collect()
}

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.processor.registry();
    Json(serde_json::json!({
        "default": registry.default_kind(),
        "providers": provider_infos(registry),
    }))
}
