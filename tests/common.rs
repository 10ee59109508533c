#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::todo,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    missing_debug_implementations,
    clippy::clone_on_ref_ptr,
    unreachable_pub,
    dead_code
)]
use async_trait::async_trait;
use mail_gateway::AppBuilder;
use mail_gateway::adapters::smtp::{MailTransport, TransportError};
use mail_gateway::adapters::storage::MemoryStorage;
use mail_gateway::config::{CleanupConfig, Config, LogFormat, ServerConfig, Settings, TelemetryConfig};
use mail_gateway::services::dispatcher::Dispatcher;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("mail_gateway=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// Stands in for the SMTP relay: keeps every rendered message, or refuses
/// all of them.
#[derive(Debug, Default)]
pub struct FakeTransport {
    refuse: bool,
    pub sent: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn refusing() -> Self {
        Self { refuse: true, sent: Mutex::default() }
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn deliver(&self, message: lettre::Message) -> Result<(), TransportError> {
        if self.refuse {
            return Err(TransportError::Delivery("Connection refused".into()));
        }
        self.sent.lock().await.push(String::from_utf8_lossy(&message.formatted()).into_owned());
        Ok(())
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings {
        smtp_server: "smtp.invalid".to_string(),
        sender_email: "sender@example.com".to_string(),
        sender_domain: "example.com".to_string(),
        use_password: true,
        ..Settings::default()
    };
    settings.apply_defaults();
    settings
}

pub fn test_config(data_dir: &Path) -> Config {
    Config {
        settings: None,
        data_dir: data_dir.to_path_buf(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: Some(0),
            trusted_proxies: vec!["127.0.0.1/32".parse().unwrap()],
            shutdown_timeout_secs: 5,
        },
        cleanup: CleanupConfig { interval_secs: 3600, retention_hours: 0 },
        telemetry: TelemetryConfig { log_format: LogFormat::Text, otlp_endpoint: None },
    }
}

pub struct TestAppBuilder {
    settings: Settings,
    transport: Arc<FakeTransport>,
    storage: Option<Arc<MemoryStorage>>,
}

impl TestAppBuilder {
    pub fn api_key(mut self, key: &str) -> Self {
        self.settings.api_key = key.to_string();
        self
    }

    pub fn settings(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn refusing_transport(mut self) -> Self {
        self.transport = Arc::new(FakeTransport::refusing());
        self
    }

    pub fn with_storage(mut self) -> Self {
        self.storage = Some(Arc::new(MemoryStorage::new()));
        self
    }

    pub async fn spawn(self) -> TestApp {
        setup_tracing();

        let data_dir = std::env::temp_dir().join(format!("mail-gateway-test-{}", Uuid::new_v4()));
        let config = test_config(&data_dir);

        let mut builder = AppBuilder::new(config, self.settings).with_transport(self.transport.clone());
        if let Some(storage) = &self.storage {
            builder = builder.with_storage(storage.clone());
        }
        let app = builder.build().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app.router;

        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>())
                .await
                .unwrap();
        });

        TestApp {
            server_url: format!("http://{addr}"),
            client: reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap(),
            transport: self.transport,
            storage: self.storage,
            dispatcher: app.dispatcher,
            data_dir,
        }
    }
}

pub struct TestApp {
    pub server_url: String,
    pub client: reqwest::Client,
    pub transport: Arc<FakeTransport>,
    pub storage: Option<Arc<MemoryStorage>>,
    pub dispatcher: Dispatcher,
    pub data_dir: PathBuf,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder { settings: test_settings(), transport: Arc::new(FakeTransport::default()), storage: None }
    }

    pub async fn spawn() -> Self {
        Self::builder().spawn().await
    }

    pub async fn send(&self, payload: &serde_json::Value) -> reqwest::Response {
        self.client.post(format!("{}/v1/mail/send", self.server_url)).json(payload).send().await.unwrap()
    }

    /// Waits for every accepted dispatch to finish.
    pub async fn drain(&self) {
        assert!(self.dispatcher.drain(Duration::from_secs(5)).await, "dispatches did not finish in time");
    }

    /// Finds the outcome record for `email_id`, whichever date directory it landed in.
    pub async fn wait_for_record(&self, email_id: &str, status: &str) -> serde_json::Value {
        for _ in 0..100 {
            if let Some(path) = self.find_file(status, &format!("{email_id}.json")) {
                let raw = std::fs::read_to_string(path).unwrap();
                return serde_json::from_str(&raw).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no {status} record for {email_id} under {}", self.data_dir.display());
    }

    pub fn debug_dump(&self, email_id: &str) -> Option<String> {
        self.find_file("debug", &format!("{email_id}_email.txt")).map(|p| std::fs::read_to_string(p).unwrap())
    }

    /// Number of outcome records written so far.
    pub fn record_count(&self) -> usize {
        let Ok(dates) = std::fs::read_dir(&self.data_dir) else {
            return 0;
        };
        dates
            .flatten()
            .flat_map(|date| ["success", "failure"].map(|s| date.path().join(s)))
            .filter_map(|dir| std::fs::read_dir(dir).ok())
            .map(|entries| entries.flatten().filter(|e| e.path().extension().is_some_and(|x| x == "json")).count())
            .sum()
    }

    fn find_file(&self, subdir: &str, name: &str) -> Option<PathBuf> {
        std::fs::read_dir(&self.data_dir)
            .ok()?
            .flatten()
            .map(|date| date.path().join(subdir).join(name))
            .find(|p| p.exists())
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
