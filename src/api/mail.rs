use crate::api::AppState;
use crate::api::middleware::sanitize_headers;
use crate::api::schemas::mail::SendEmailResponse;
use crate::domain::attachment::{AttachmentLimits, AttachmentUpload};
use crate::domain::email::{BodyType, EmailRequest, validate};
use crate::domain::outcome::RequestContext;
use crate::error::{AppError, Result};
use crate::services::attachment_service::StagingError;
use crate::services::dispatcher::DispatchJob;
use axum::{
    Json,
    extract::{
        ConnectInfo, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode},
};
use std::net::SocketAddr;
use uuid::Uuid;

const ATTACHMENTS_FIELD: &str = "attachments";

/// Accepts a JSON send request and returns its identifier immediately.
///
/// # Errors
/// Returns `AppError::BadRequest` for a malformed body and
/// `AppError::Validation` when a limit or format rule is violated.
pub async fn send_email(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: std::result::Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<SendEmailResponse>> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    validate(&request, &state.settings.validation_limits())?;

    let email_id = Uuid::new_v4();
    state.dispatcher.dispatch(DispatchJob {
        email_id,
        request,
        context: request_context(&state, &headers, peer),
        attachment_keys: Vec::new(),
    });

    tracing::info!(email_id = %email_id, "Email accepted");
    Ok(Json(SendEmailResponse::accepted(email_id)))
}

/// Accepts a multipart send request, stages its files, and returns the
/// identifier immediately.
///
/// # Errors
/// Returns `AppError::BadRequest` for a malformed form, `AppError::Validation`
/// for rule violations, and `AppError::Staging` when the files are rejected or
/// cannot be stored.
pub async fn send_email_with_attachments(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<SendEmailResponse>> {
    let attachment_service = state.attachment_service.as_ref().ok_or(AppError::Internal)?;
    let multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (request, uploads) = MailForm::read(multipart, attachment_service.limits()).await?.into_request()?;
    validate(&request, &state.settings.validation_limits())?;

    let handles = attachment_service.stage_all(uploads).await?;

    let email_id = Uuid::new_v4();
    let attachment_count = handles.len();
    state.dispatcher.dispatch(DispatchJob {
        email_id,
        request,
        context: request_context(&state, &headers, peer),
        attachment_keys: handles.into_iter().map(|h| h.key).collect(),
    });

    tracing::info!(email_id = %email_id, attachment_count, "Email with attachments accepted");
    Ok(Json(SendEmailResponse::accepted(email_id)))
}

fn request_context(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> RequestContext {
    RequestContext {
        client_ip: state.client_ip.resolve(headers, peer.ip()).to_string(),
        headers: sanitize_headers(headers),
    }
}

/// Raw multipart fields before they are turned into a request.
#[derive(Debug, Default)]
struct MailForm {
    recipient_email: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    body_type: Option<String>,
    debug: Option<String>,
    uploads: Vec<AttachmentUpload>,
}

impl MailForm {
    async fn read(mut multipart: Multipart, limits: AttachmentLimits) -> Result<Self> {
        let mut form = Self::default();
        let rejected = |e: MultipartError| multipart_error(e, limits);

        while let Some(field) = multipart.next_field().await.map_err(rejected)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == ATTACHMENTS_FIELD {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(rejected)?;
                // Browsers submit an empty part when no file was picked.
                if filename.is_empty() && data.is_empty() {
                    continue;
                }
                form.uploads.push(AttachmentUpload::new(&filename, data));
                continue;
            }

            let slot = match name.as_str() {
                "recipient_email" => &mut form.recipient_email,
                "subject" => &mut form.subject,
                "body" => &mut form.body,
                "body_type" => &mut form.body_type,
                "debug" => &mut form.debug,
                _ => continue,
            };
            *slot = Some(field.text().await.map_err(rejected)?);
        }

        Ok(form)
    }

    fn into_request(self) -> Result<(EmailRequest, Vec<AttachmentUpload>)> {
        let body_type = self.body_type.filter(|t| !t.is_empty()).unwrap_or_else(|| BodyType::PLAIN.to_string());
        let debug = match self.debug.as_deref() {
            None => false,
            Some(raw) => parse_flag(raw)
                .ok_or_else(|| AppError::BadRequest(format!("debug must be true or false, got {raw:?}")))?,
        };

        let request = EmailRequest {
            recipient_email: required("recipient_email", self.recipient_email)?,
            subject: required("subject", self.subject)?,
            body: required("body", self.body)?,
            body_type,
            debug,
        };

        Ok((request, self.uploads))
    }
}

/// A body cut off by the route's size limit can only be an oversized file,
/// so it is reported the same way as one.
fn multipart_error(e: MultipartError, limits: AttachmentLimits) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return StagingError::FileTooLarge { max_bytes: limits.max_size_bytes }.into();
    }
    AppError::BadRequest(e.body_text())
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| AppError::BadRequest(format!("{name} is required")))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" | "" => Some(false),
        _ => None,
    }
}
