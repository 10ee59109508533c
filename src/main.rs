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

use anyhow::Context;
use mail_gateway::adapters::storage::S3Storage;
use mail_gateway::config::Config;
use mail_gateway::{AppBuilder, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    mail_gateway::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_server");
    let (listener, app_router, dispatcher, shutdown_tx, shutdown_rx, workers) = async {
        // Phase 1: Settings and external resources
        let settings_path = config.settings_path()?;
        let settings = config.load_settings()?;
        tracing::info!(
            path = %settings_path.display(),
            api_key_auth = settings.is_api_key_auth_enabled(),
            smtp_server = %settings.smtp_server,
            "settings loaded"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        mail_gateway::spawn_signal_handler(shutdown_tx.clone());

        let mut builder = AppBuilder::new(config.clone(), settings.clone());

        if let Some(store) = settings.object_store() {
            let s3_client = mail_gateway::initialize_s3_client(&store).await;
            let storage = S3Storage::new(s3_client, store.bucket.clone());
            storage.ensure_bucket().await.with_context(|| format!("failed to prepare bucket {}", store.bucket))?;
            tracing::info!(endpoint = %store.endpoint_url, bucket = %store.bucket, "attachment storage enabled");
            builder = builder.with_storage(Arc::new(storage));
        } else {
            tracing::info!("attachment storage not configured, attachment endpoint disabled");
        }

        // Phase 2: Component wiring
        let app = builder.build().await?;

        // Phase 3: Listener
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.listen_port(&settings)).parse()?;
        tracing::info!(address = %addr, "listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;

        Ok::<
            (
                tokio::net::TcpListener,
                axum::Router,
                mail_gateway::services::dispatcher::Dispatcher,
                watch::Sender<bool>,
                watch::Receiver<bool>,
                mail_gateway::Workers,
            ),
            anyhow::Error,
        >((listener, app.router, app.dispatcher, shutdown_tx, shutdown_rx, app.workers))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Serve
    let worker_tasks = workers.spawn_all(shutdown_rx.clone());

    let mut api_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&s| s).await;
        });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    // Phase 5: Drain in-flight dispatches and workers
    let _ = shutdown_tx.send(true);
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    tracing::info!(in_flight = dispatcher.in_flight(), "Waiting for in-flight dispatches");

    tokio::select! {
        drained = async {
            futures::future::join_all(worker_tasks).await;
            dispatcher.drain(timeout).await
        } => {
            if drained {
                tracing::info!("Background tasks finished.");
            } else {
                tracing::warn!(in_flight = dispatcher.in_flight(), "Timeout waiting for dispatches to finish.");
            }
        }
        () = tokio::time::sleep(timeout) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    telemetry_guard.shutdown();
    Ok(())
}
