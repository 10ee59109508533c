#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;
pub mod workers;

use crate::adapters::smtp::{MailTransport, SmtpRelay};
use crate::adapters::storage::ObjectStorage;
use crate::api::AppState;
use crate::api::middleware::ClientIpResolver;
use crate::config::settings::ObjectStoreSettings;
use crate::config::{Config, Settings};
use crate::services::attachment_service::AttachmentService;
use crate::services::composer::{MessageComposer, SenderIdentity};
use crate::services::dispatcher::Dispatcher;
use crate::services::recorder::ResultRecorder;
use crate::workers::AttachmentCleanupWorker;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background loops owned by the process, started once the server is up.
#[derive(Debug, Default)]
pub struct Workers {
    attachment_cleanup: Option<AttachmentCleanupWorker>,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(worker) = self.attachment_cleanup {
            tasks.push(tokio::spawn(worker.run(shutdown_rx)));
        }
        tasks
    }
}

#[derive(Debug)]
pub struct App {
    pub router: axum::Router,
    pub dispatcher: Dispatcher,
    pub workers: Workers,
}

/// Wires the components together from already-initialized resources.
///
/// The transport defaults to an SMTP relay built from the settings. The
/// attachment route, stager and retention worker exist only when storage is
/// supplied.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    settings: Settings,
    transport: Option<Arc<dyn MailTransport>>,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config, settings: Settings) -> Self {
        Self { config, settings, transport: None, storage: None }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// # Errors
    /// Returns an error if the SMTP relay cannot be configured, the object
    /// store is unreachable, or the API document cannot be serialized.
    pub async fn build(self) -> anyhow::Result<App> {
        let Self { config, settings, transport, storage } = self;

        let transport = match transport {
            Some(transport) => transport,
            None => Arc::new(SmtpRelay::from_settings(&settings).context("failed to configure SMTP relay")?),
        };

        if let Some(storage) = &storage {
            storage.check().await.context("object store is not reachable")?;
        }

        let attachment_service =
            storage.as_ref().map(|s| AttachmentService::new(Arc::clone(s), settings.attachment_limits()));

        let dispatcher = Dispatcher::new(
            MessageComposer::new(SenderIdentity::from_settings(&settings)),
            transport,
            attachment_service.clone(),
            ResultRecorder::new(&config.data_dir),
        );

        let openapi = api::docs::build_openapi(&settings, attachment_service.as_ref().map(AttachmentService::limits));
        let openapi = serde_json::to_vec(&openapi).context("failed to serialize API document")?;

        let attachment_cleanup = match &storage {
            Some(storage) if config.cleanup.retention_hours > 0 => Some(AttachmentCleanupWorker::new(
                Arc::clone(storage),
                Duration::from_secs(config.cleanup.interval_secs.max(1)),
                time::Duration::seconds(
                    i64::try_from(config.cleanup.retention_hours.saturating_mul(3600)).unwrap_or(i64::MAX),
                ),
            )),
            _ => None,
        };

        let state = AppState {
            settings: Arc::new(settings),
            dispatcher: dispatcher.clone(),
            attachment_service,
            client_ip: ClientIpResolver::new(config.server.trusted_proxies.clone()),
            openapi: openapi.into(),
        };

        Ok(App { router: api::app_router(state), dispatcher, workers: Workers { attachment_cleanup } })
    }
}

/// Builds an S3 client for the configured endpoint with static credentials
/// and path-style addressing, which `MinIO` requires.
pub async fn initialize_s3_client(store: &ObjectStoreSettings) -> aws_sdk_s3::Client {
    let credentials = aws_credential_types::Credentials::new(
        store.access_key.clone(),
        store.secret_key.clone(),
        None,
        None,
        "settings",
    );

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new("us-east-1"))
        .endpoint_url(&store.endpoint_url)
        .credentials_provider(credentials)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true).build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Flips `shutdown_tx` on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, draining...");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through `tracing` before the default hook runs.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();

        tracing::error!(panic.payload = %payload, panic.location = %location, "Panic occurred");
        default_hook(info);
    }));
}
