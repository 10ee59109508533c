use serde::Deserialize;
use thiserror::Error;

/// Declared kind of the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Plain,
    Html,
}

impl BodyType {
    pub const PLAIN: &'static str = "plain";
    pub const HTML: &'static str = "html";

    /// Parses the wire name. Only the exact lowercase names are accepted.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            Self::PLAIN => Some(Self::Plain),
            Self::HTML => Some(Self::Html),
            _ => None,
        }
    }
}

fn default_body_type() -> String {
    BodyType::PLAIN.to_string()
}

/// An inbound send request, as accepted from either HTTP surface.
///
/// `body_type` is kept as the raw string so that validation, not
/// deserialization, decides whether it is acceptable. A missing `body_type`
/// defaults to `plain`; an explicit empty string does not.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailRequest {
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_body_type")]
    pub body_type: String,
    #[serde(default)]
    pub debug: bool,
}

impl EmailRequest {
    /// Body kind for composition. Anything other than `html` is sent as plain
    /// text; validation has already rejected unknown kinds by then.
    #[must_use]
    pub fn body_kind(&self) -> BodyType {
        BodyType::parse(&self.body_type).unwrap_or(BodyType::Plain)
    }

    /// Coarse size figure stored in outcome records: the character counts of
    /// subject, body and recipient added together. Headers and attachments are
    /// not included.
    #[must_use]
    pub fn approximate_length(&self) -> usize {
        self.subject.chars().count() + self.body.chars().count() + self.recipient_email.chars().count()
    }
}

/// Length ceilings, in bytes, applied by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_recipient_len: usize,
    pub max_subject_len: usize,
    pub max_body_len: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("email address must be less than {max} characters")]
    RecipientTooLong { max: usize },
    #[error("subject must be less than {max} characters")]
    SubjectTooLong { max: usize },
    #[error("body content must be less than {max} characters")]
    BodyTooLong { max: usize },
    #[error("body type must be either 'plain' or 'html'")]
    InvalidBodyType,
    #[error("invalid email address format")]
    InvalidRecipient,
}

/// Checks a request against the configured limits. The first failing rule is
/// reported; rules run in a fixed order.
///
/// The recipient check only requires an `@` somewhere in the address. It is
/// not an RFC 5322 parser; malformed addresses that pass here fail later, at
/// composition time, and end up in a failure outcome record.
///
/// # Errors
/// Returns the `ValidationError` for the first violated rule.
pub fn validate(req: &EmailRequest, limits: &ValidationLimits) -> Result<(), ValidationError> {
    if req.recipient_email.len() > limits.max_recipient_len {
        return Err(ValidationError::RecipientTooLong { max: limits.max_recipient_len });
    }
    if req.subject.len() > limits.max_subject_len {
        return Err(ValidationError::SubjectTooLong { max: limits.max_subject_len });
    }
    if req.body.len() > limits.max_body_len {
        return Err(ValidationError::BodyTooLong { max: limits.max_body_len });
    }
    if BodyType::parse(&req.body_type).is_none() {
        return Err(ValidationError::InvalidBodyType);
    }
    if !req.recipient_email.contains('@') {
        return Err(ValidationError::InvalidRecipient);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ValidationLimits = ValidationLimits { max_recipient_len: 64, max_subject_len: 255, max_body_len: 50_000 };

    fn request() -> EmailRequest {
        EmailRequest {
            recipient_email: "user@example.com".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
            body_type: "plain".into(),
            debug: false,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert_eq!(validate(&request(), &LIMITS), Ok(()));

        let html = EmailRequest { body_type: "html".into(), ..request() };
        assert_eq!(validate(&html, &LIMITS), Ok(()));
    }

    #[test]
    fn test_recipient_too_long_cites_limit() {
        let req = EmailRequest { recipient_email: format!("{}@example.com", "a".repeat(60)), ..request() };
        let err = validate(&req, &LIMITS).unwrap_err();
        assert_eq!(err, ValidationError::RecipientTooLong { max: 64 });
        assert_eq!(err.to_string(), "email address must be less than 64 characters");
    }

    #[test]
    fn test_limits_are_inclusive() {
        let req = EmailRequest { subject: "s".repeat(255), ..request() };
        assert!(validate(&req, &LIMITS).is_ok());

        let req = EmailRequest { subject: "s".repeat(256), ..request() };
        assert_eq!(validate(&req, &LIMITS), Err(ValidationError::SubjectTooLong { max: 255 }));
    }

    #[test]
    fn test_body_too_long() {
        let req = EmailRequest { body: "b".repeat(50_001), ..request() };
        assert_eq!(validate(&req, &LIMITS), Err(ValidationError::BodyTooLong { max: 50_000 }));
    }

    #[test]
    fn test_body_type_must_be_known() {
        for bad in ["", "markdown", "HTML", "text/plain"] {
            let req = EmailRequest { body_type: bad.into(), ..request() };
            assert_eq!(validate(&req, &LIMITS), Err(ValidationError::InvalidBodyType), "body_type {bad:?}");
        }
    }

    #[test]
    fn test_recipient_needs_at_sign() {
        let req = EmailRequest { recipient_email: "not-an-email".into(), ..request() };
        let err = validate(&req, &LIMITS).unwrap_err();
        assert_eq!(err.to_string(), "invalid email address format");
    }

    #[test]
    fn test_first_failure_wins() {
        let req = EmailRequest {
            recipient_email: "x".repeat(100),
            subject: "s".repeat(300),
            body_type: "rtf".into(),
            ..request()
        };
        assert_eq!(validate(&req, &LIMITS), Err(ValidationError::RecipientTooLong { max: 64 }));
    }

    #[test]
    fn test_body_type_defaults_to_plain_when_absent() {
        let req: EmailRequest =
            serde_json::from_str(r#"{"recipient_email":"a@b.c","subject":"s","body":"b"}"#).unwrap();
        assert_eq!(req.body_type, "plain");
        assert!(!req.debug);

        let req: EmailRequest =
            serde_json::from_str(r#"{"recipient_email":"a@b.c","subject":"s","body":"b","body_type":""}"#).unwrap();
        assert_eq!(validate(&req, &LIMITS), Err(ValidationError::InvalidBodyType));
    }

    #[test]
    fn test_approximate_length_counts_characters() {
        let req = EmailRequest { subject: "Hé".into(), ..request() };
        assert_eq!(req.approximate_length(), 2 + 5 + 16);
    }
}
