use crate::config::Settings;
use crate::domain::attachment::ResolvedAttachment;
use crate::domain::email::{BodyType, EmailRequest};
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Address;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("invalid {field} address {value:?}: {reason}")]
    Address { field: &'static str, value: String, reason: String },
    #[error("invalid content type {0:?}")]
    ContentType(String),
    #[error("failed to build message: {0}")]
    Build(String),
}

/// Who the gateway sends as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub address: String,
    pub display: String,
    pub domain: String,
    pub authenticated: bool,
}

impl SenderIdentity {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            address: settings.sender_email.clone(),
            display: settings.display_email().to_string(),
            domain: settings.sender_domain.clone(),
            authenticated: settings.use_password,
        }
    }

    /// The `From` mailbox.
    ///
    /// An authenticating relay answers 553 when the envelope sender differs
    /// from the login, so in that case the address is always the
    /// authenticated one and a distinct display identity only becomes the
    /// display name. Without authentication the display identity is used as
    /// the mailbox itself when it parses as one.
    fn from_mailbox(&self) -> Result<Mailbox, ComposeError> {
        let address: Address = self.address.parse().map_err(|e: lettre::address::AddressError| {
            ComposeError::Address { field: "sender", value: self.address.clone(), reason: e.to_string() }
        })?;

        let display = self.display.trim();
        let distinct_display = (!display.is_empty() && display != self.address).then(|| display.to_string());

        if !self.authenticated
            && let Ok(mailbox) = display.parse::<Mailbox>()
        {
            return Ok(mailbox);
        }

        Ok(Mailbox::new(distinct_display, address))
    }
}

/// A message ready for the transport. Built once, consumed once.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    message: Message,
}

impl ComposedMessage {
    /// Full RFC 5322 rendering, headers and body.
    #[must_use]
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Pure transform from a validated request to a transport-ready message.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    sender: SenderIdentity,
}

impl MessageComposer {
    #[must_use]
    pub const fn new(sender: SenderIdentity) -> Self {
        Self { sender }
    }

    #[must_use]
    pub fn message_id(&self, email_id: Uuid) -> String {
        format!("<{email_id}@{}>", self.sender.domain)
    }

    /// # Errors
    /// Returns a `ComposeError` if an address does not parse or the message
    /// cannot be assembled.
    pub fn compose(
        &self,
        req: &EmailRequest,
        attachments: Vec<ResolvedAttachment>,
        email_id: Uuid,
    ) -> Result<ComposedMessage, ComposeError> {
        let to: Mailbox = req.recipient_email.parse().map_err(|e: lettre::address::AddressError| {
            ComposeError::Address { field: "recipient", value: req.recipient_email.clone(), reason: e.to_string() }
        })?;

        let builder = Message::builder()
            .from(self.sender.from_mailbox()?)
            .to(to)
            .subject(req.subject.as_str())
            .message_id(Some(self.message_id(email_id)));

        let content_type = match req.body_kind() {
            BodyType::Plain => ContentType::TEXT_PLAIN,
            BodyType::Html => ContentType::TEXT_HTML,
        };
        let body = SinglePart::builder().header(content_type).body(req.body.clone());

        let message = if attachments.is_empty() {
            builder.singlepart(body)
        } else {
            let mut parts = MultiPart::mixed().singlepart(body);
            for attachment in attachments {
                let content_type = ContentType::parse(attachment.content_type)
                    .map_err(|_| ComposeError::ContentType(attachment.content_type.to_string()))?;
                parts = parts.singlepart(Attachment::new(attachment.filename).body(attachment.data.to_vec(), content_type));
            }
            builder.multipart(parts)
        }
        .map_err(|e| ComposeError::Build(e.to_string()))?;

        Ok(ComposedMessage { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sender(authenticated: bool, display: &str) -> SenderIdentity {
        SenderIdentity {
            address: "sender@example.com".into(),
            display: display.into(),
            domain: "example.com".into(),
            authenticated,
        }
    }

    fn request(body_type: &str) -> EmailRequest {
        EmailRequest {
            recipient_email: "user@example.com".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
            body_type: body_type.into(),
            debug: false,
        }
    }

    fn render(composer: &MessageComposer, req: &EmailRequest, id: Uuid) -> String {
        let composed = composer.compose(req, Vec::new(), id).unwrap();
        String::from_utf8(composed.formatted()).unwrap()
    }

    #[test]
    fn test_headers_and_message_id() {
        let composer = MessageComposer::new(sender(true, "sender@example.com"));
        let id = Uuid::new_v4();
        let text = render(&composer, &request("plain"), id);

        let from = text.lines().find(|l| l.starts_with("From:")).unwrap();
        assert!(from.contains("sender@example.com"), "{from}");
        let to = text.lines().find(|l| l.starts_with("To:")).unwrap();
        assert!(to.contains("user@example.com"), "{to}");
        assert!(text.contains("Subject: Hi"), "{text}");
        assert!(text.contains(&format!("Message-ID: <{id}@example.com>")), "{text}");
        assert!(text.contains("Content-Type: text/plain"), "{text}");
        assert!(text.contains("Hello"), "{text}");
    }

    #[test]
    fn test_html_body_type() {
        let composer = MessageComposer::new(sender(true, ""));
        let text = render(&composer, &request("html"), Uuid::new_v4());
        assert!(text.contains("Content-Type: text/html"), "{text}");
    }

    #[test]
    fn test_authenticated_sender_keeps_login_address() {
        let composer = MessageComposer::new(sender(true, "Support Team"));
        let text = render(&composer, &request("plain"), Uuid::new_v4());
        let from = text.lines().find(|l| l.starts_with("From:")).unwrap();
        assert!(from.contains("Support Team"), "{from}");
        assert!(from.contains("<sender@example.com>"), "{from}");

        let composer = MessageComposer::new(sender(true, "noreply@other.org"));
        let text = render(&composer, &request("plain"), Uuid::new_v4());
        let from = text.lines().find(|l| l.starts_with("From:")).unwrap();
        assert!(from.contains("<sender@example.com>"), "{from}");
    }

    #[test]
    fn test_unauthenticated_sender_uses_display_verbatim() {
        let composer = MessageComposer::new(sender(false, "noreply@other.org"));
        let text = render(&composer, &request("plain"), Uuid::new_v4());
        let from = text.lines().find(|l| l.starts_with("From:")).unwrap();
        assert!(from.contains("noreply@other.org"), "{from}");
        assert!(!from.contains("sender@example.com"), "{from}");
    }

    #[test]
    fn test_attachments_are_embedded() {
        let composer = MessageComposer::new(sender(true, ""));
        let attachments = vec![ResolvedAttachment {
            filename: "report.pdf".into(),
            content_type: "application/pdf",
            data: Bytes::from_static(b"%PDF-1.4"),
        }];
        let composed = composer.compose(&request("plain"), attachments, Uuid::new_v4()).unwrap();
        let text = String::from_utf8(composed.formatted()).unwrap();

        assert!(text.contains("multipart/mixed"), "{text}");
        assert!(text.contains("application/pdf"), "{text}");
        assert!(text.contains("filename=\"report.pdf\""), "{text}");
    }

    #[test]
    fn test_unparseable_recipient_is_a_compose_error() {
        let composer = MessageComposer::new(sender(true, ""));
        let req = EmailRequest { recipient_email: "two@@signs".into(), ..request("plain") };
        let err = composer.compose(&req, Vec::new(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ComposeError::Address { field: "recipient", .. }));
    }
}
