use crate::api::middleware::ClientIpResolver;
use crate::config::Settings;
use crate::services::attachment_service::AttachmentService;
use crate::services::dispatcher::Dispatcher;
use axum::body::{Body, Bytes};
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod docs;
pub mod health;
pub mod mail;
pub mod middleware;
pub mod schemas;

/// Room for the text fields and multipart framing on top of the files.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Dispatcher,
    pub attachment_service: Option<AttachmentService>,
    pub client_ip: ClientIpResolver,
    pub openapi: Bytes,
}

/// Configures and returns the application router.
///
/// The attachment route only exists when an attachment service is present.
/// The API key check covers `/v1/mail/*` and nothing else.
pub fn app_router(state: AppState) -> Router {
    let mut mail_routes = Router::new().route("/mail/send", post(mail::send_email));

    if let Some(service) = &state.attachment_service {
        let limits = service.limits();
        // One file over the count limit still fits, so it gets the count error
        // rather than a body size rejection.
        let body_limit = limits
            .max_count
            .saturating_add(1)
            .saturating_mul(limits.max_size_bytes)
            .saturating_add(MULTIPART_OVERHEAD_BYTES);

        mail_routes = mail_routes.route(
            "/mail/send-with-attachments",
            post(mail::send_email_with_attachments).layer(DefaultBodyLimit::max(body_limit)),
        );
    }

    let mail_routes = mail_routes.route_layer(from_fn_with_state(state.clone(), middleware::require_api_key));

    Router::new()
        .route("/health", get(health::health))
        .route(docs::OPENAPI_PATH, get(docs::openapi_json))
        .route("/", get(docs::redirect_to_openapi))
        .route("/docs", get(docs::redirect_to_openapi))
        .nest("/v1", mail_routes)
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        let status = response.status();
                        span.record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id"), MakeRequestUuid))
        .with_state(state)
}
