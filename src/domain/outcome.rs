use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Success,
    Failure,
}

impl DispatchStatus {
    /// Directory name under the date partition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Client facts captured at acceptance time and carried into the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: String,
    pub headers: BTreeMap<String, String>,
}

/// One dispatch attempt's terminal result. Written once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub email_id: Uuid,
    pub status: DispatchStatus,
    pub detail: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub client_ip: String,
    pub headers: BTreeMap<String, String>,
    pub message_length: usize,
}

impl DispatchOutcome {
    #[must_use]
    pub fn new(
        email_id: Uuid,
        status: DispatchStatus,
        detail: impl Into<String>,
        context: &RequestContext,
        message_length: usize,
    ) -> Self {
        Self {
            email_id,
            status,
            detail: detail.into(),
            timestamp: OffsetDateTime::now_utc(),
            client_ip: context.client_ip.clone(),
            headers: context.headers.clone(),
            message_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_with_lowercase_status() {
        let ctx = RequestContext {
            client_ip: "203.0.113.7".into(),
            headers: BTreeMap::from([("user-agent".to_string(), "curl/8".to_string())]),
        };
        let outcome = DispatchOutcome::new(Uuid::new_v4(), DispatchStatus::Success, "Email sent successfully", &ctx, 23);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["client_ip"], "203.0.113.7");
        assert_eq!(json["headers"]["user-agent"], "curl/8");
        assert_eq!(json["message_length"], 23);
        assert_eq!(json["email_id"], outcome.email_id.to_string());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));

        let back: DispatchOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, DispatchStatus::Success);
    }
}
