use crate::api::AppState;
use crate::api::schemas::openapi::{
    Components, Info, MediaType, OpenApi, Operation, PathItem, RequestBody, Response, Schema, SecurityRequirement,
    SecurityScheme,
};
use crate::config::Settings;
use crate::domain::attachment::AttachmentLimits;
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use std::collections::BTreeMap;

pub const OPENAPI_PATH: &str = "/openapi.json";
pub const SEND_PATH: &str = "/v1/mail/send";
pub const SEND_WITH_ATTACHMENTS_PATH: &str = "/v1/mail/send-with-attachments";

const API_KEY_SCHEME: &str = "ApiKeyAuth";
const JSON: &str = "application/json";
const MULTIPART: &str = "multipart/form-data";

/// Serves the document built at startup.
pub async fn openapi_json(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, JSON)], state.openapi.clone())
}

/// `/` and `/docs` both point at the machine-readable document.
pub async fn redirect_to_openapi() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, OPENAPI_PATH)])
}

/// Describes exactly the routes that get mounted for these settings.
#[must_use]
pub fn build_openapi(settings: &Settings, attachments: Option<AttachmentLimits>) -> OpenApi {
    let auth = settings.is_api_key_auth_enabled();
    let security: Vec<SecurityRequirement> =
        if auth { vec![BTreeMap::from([(API_KEY_SCHEME, Vec::new())])] } else { Vec::new() };

    let mut paths = BTreeMap::new();
    paths.insert(
        "/health",
        PathItem {
            get: Some(Operation {
                summary: "Health check",
                description: "Reports that the process is up. Dependencies are not probed.",
                tags: vec!["health"],
                request_body: None,
                responses: BTreeMap::from([("200", json_response("API is healthy", "HealthResponse"))]),
                security: Vec::new(),
            }),
            ..PathItem::default()
        },
    );
    paths.insert(
        SEND_PATH,
        PathItem {
            post: Some(Operation {
                summary: "Send an email",
                description: "Validates the request and hands it to the background dispatcher.",
                tags: vec!["email"],
                request_body: Some(request_body(JSON, "EmailRequest")),
                responses: mail_responses(auth, false),
                security: security.clone(),
            }),
            ..PathItem::default()
        },
    );

    let mut schemas = BTreeMap::from([
        ("EmailRequest", email_request_schema(settings)),
        (
            "SendEmailResponse",
            Schema::object(
                vec![
                    ("message", Schema::typed("string")),
                    ("email_id", Schema::typed("string").with_format("uuid")),
                ],
                vec!["message", "email_id"],
            ),
        ),
        (
            "HealthResponse",
            Schema::object(
                vec![
                    ("status", Schema::typed("string")),
                    ("timestamp", Schema::typed("string").with_format("date-time")),
                    ("version", Schema::typed("string")),
                ],
                vec!["status", "timestamp", "version"],
            ),
        ),
        ("ErrorResponse", Schema::object(vec![("error", Schema::typed("string"))], vec!["error"])),
    ]);

    if let Some(limits) = attachments {
        paths.insert(
            SEND_WITH_ATTACHMENTS_PATH,
            PathItem {
                post: Some(Operation {
                    summary: "Send an email with attachments",
                    description: "Stages the uploaded files, then hands the request to the background dispatcher.",
                    tags: vec!["email"],
                    request_body: Some(request_body(MULTIPART, "EmailWithAttachmentsForm")),
                    responses: mail_responses(auth, true),
                    security,
                }),
                ..PathItem::default()
            },
        );
        schemas.insert("EmailWithAttachmentsForm", attachments_form_schema(settings, limits));
    }

    let security_schemes = if auth {
        BTreeMap::from([(API_KEY_SCHEME, SecurityScheme { kind: "apiKey", location: "header", name: "X-API-Key" })])
    } else {
        BTreeMap::new()
    };

    OpenApi {
        openapi: "3.0.3",
        info: Info {
            title: settings.api_name.clone(),
            description: settings.api_description.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
        paths,
        components: Components { schemas, security_schemes },
    }
}

fn json_response(description: &'static str, schema: &str) -> Response {
    Response { description, content: BTreeMap::from([(JSON, MediaType { schema: Schema::reference(schema) })]) }
}

fn request_body(content_type: &'static str, schema: &str) -> RequestBody {
    RequestBody { required: true, content: BTreeMap::from([(content_type, MediaType { schema: Schema::reference(schema) })]) }
}

fn mail_responses(auth: bool, staging: bool) -> BTreeMap<&'static str, Response> {
    let mut responses = BTreeMap::from([
        ("200", json_response("Email accepted for background delivery", "SendEmailResponse")),
        ("400", json_response("Invalid request", "ErrorResponse")),
    ]);
    if auth {
        responses.insert("403", json_response("Invalid or missing API key", "ErrorResponse"));
    }
    if staging {
        responses.insert("500", json_response("Attachment storage failed", "ErrorResponse"));
    }
    responses
}

fn mail_properties(settings: &Settings) -> Vec<(&'static str, Schema)> {
    vec![
        (
            "recipient_email",
            Schema::typed("string").with_format("email").with_max_length(settings.max_len_recipient_email),
        ),
        ("subject", Schema::typed("string").with_max_length(settings.max_len_subject)),
        ("body", Schema::typed("string").with_max_length(settings.max_len_body)),
        (
            "body_type",
            Schema {
                kind: Some("string"),
                enum_values: vec!["plain", "html"],
                default: Some(json!("plain")),
                ..Schema::default()
            },
        ),
        (
            "debug",
            Schema { default: Some(json!(false)), ..Schema::typed("boolean") }
                .described("Also store the fully rendered message next to the outcome record"),
        ),
    ]
}

fn email_request_schema(settings: &Settings) -> Schema {
    Schema::object(mail_properties(settings), vec!["recipient_email", "subject", "body"])
}

fn attachments_form_schema(settings: &Settings, limits: AttachmentLimits) -> Schema {
    let mut properties = mail_properties(settings);
    properties.push((
        "attachments",
        Schema {
            kind: Some("array"),
            max_items: Some(limits.max_count),
            items: Some(Box::new(Schema::typed("string").with_format("binary"))),
            ..Schema::default()
        }
        .described(format!(
            "Up to {} files of at most {} bytes each",
            limits.max_count, limits.max_size_bytes
        )),
    ));
    Schema::object(properties, vec!["recipient_email", "subject", "body"])
}
