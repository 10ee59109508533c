use crate::config::Settings;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid SMTP relay configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Delivery(String),
}

/// Upstream relay collaborator. One call per composed message, no retries.
#[async_trait]
pub trait MailTransport: Send + Sync + std::fmt::Debug + 'static {
    /// Delivers a composed message.
    ///
    /// # Errors
    /// Returns `TransportError::Delivery` if the relay could not be reached or
    /// refused the message.
    async fn deliver(&self, message: Message) -> Result<(), TransportError>;
}

/// `lettre` SMTP relay client built from the settings document.
///
/// `use_ssl` selects implicit TLS, otherwise `use_tls` selects STARTTLS, and
/// with neither flag the connection is plaintext. Credentials are only sent
/// when `use_password` is set.
#[derive(Clone)]
pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl std::fmt::Debug for SmtpRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpRelay").field("server", &self.server).finish_non_exhaustive()
    }
}

impl SmtpRelay {
    /// # Errors
    /// Returns `TransportError::Config` if the TLS parameters for the host cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, TransportError> {
        let host = settings.smtp_server.as_str();

        let builder = if settings.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(|e| TransportError::Config(e.to_string()))?
        } else if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| TransportError::Config(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let mut builder = if settings.smtp_port == 0 { builder } else { builder.port(settings.smtp_port) };

        if settings.use_password {
            builder = builder
                .credentials(Credentials::new(settings.sender_email.clone(), settings.sender_password.clone()));
        }

        Ok(Self { transport: builder.build(), server: format!("{host}:{}", settings.smtp_port) })
    }
}

#[async_trait]
impl MailTransport for SmtpRelay {
    async fn deliver(&self, message: Message) -> Result<(), TransportError> {
        self.transport.send(message).await.map_err(|e| TransportError::Delivery(e.to_string()))?;
        Ok(())
    }
}
