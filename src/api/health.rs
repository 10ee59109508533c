use crate::api::schemas::health::HealthResponse;
use axum::Json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Liveness only: answers as long as the process is serving requests.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
