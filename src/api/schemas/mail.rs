use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCEPTED_MESSAGE: &str = "Email is being sent in the background";

#[derive(Debug, Serialize, Deserialize)]
pub struct SendEmailResponse {
    pub message: String,
    pub email_id: Uuid,
}

impl SendEmailResponse {
    #[must_use]
    pub fn accepted(email_id: Uuid) -> Self {
        Self { message: ACCEPTED_MESSAGE.to_string(), email_id }
    }
}
