//! Liveness endpoint.

use axum::{response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

const SERVICE_NAME: &str = "ocrdesk";

pub async fn health() -> impl IntoResponse {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
        "message": "OCR service is running",
        "serviceName": SERVICE_NAME,
        "buildMetadata": {
            "version": env!("CARGO_PKG_VERSION"),
            "hostname": hostname,
        },
    }))
}
