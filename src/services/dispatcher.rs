use crate::adapters::smtp::MailTransport;
use crate::domain::email::EmailRequest;
use crate::domain::outcome::{DispatchOutcome, DispatchStatus, RequestContext};
use crate::services::attachment_service::AttachmentService;
use crate::services::composer::MessageComposer;
use crate::services::recorder::ResultRecorder;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

const SENT_DETAIL: &str = "Email sent successfully";

#[derive(Clone, Debug)]
struct Metrics {
    dispatched: Counter<u64>,
    duration: Histogram<f64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mail-gateway");
        Self {
            dispatched: meter
                .u64_counter("mail_dispatch_total")
                .with_description("Total number of dispatch attempts by terminal status")
                .build(),
            duration: meter
                .f64_histogram("mail_dispatch_duration_seconds")
                .with_description("Time from hand-off to recorded outcome")
                .with_unit("s")
                .build(),
        }
    }
}

/// Everything a background dispatch needs, captured at acceptance time.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub email_id: Uuid,
    pub request: EmailRequest,
    pub context: RequestContext,
    /// Object keys of the staged attachments.
    pub attachment_keys: Vec<String>,
}

struct Attempt {
    outcome: DispatchOutcome,
    debug_dump: Option<Vec<u8>>,
}

/// Runs compose, deliver and record detached from the HTTP request.
///
/// Every job ends in exactly one outcome record. A job is never retried.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    composer: MessageComposer,
    transport: Arc<dyn MailTransport>,
    attachments: Option<AttachmentService>,
    recorder: ResultRecorder,
    tracker: TaskTracker,
    metrics: Metrics,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        composer: MessageComposer,
        transport: Arc<dyn MailTransport>,
        attachments: Option<AttachmentService>,
        recorder: ResultRecorder,
    ) -> Self {
        Self { composer, transport, attachments, recorder, tracker: TaskTracker::new(), metrics: Metrics::new() }
    }

    /// Hands a job to the background. Returns immediately.
    pub fn dispatch(&self, job: DispatchJob) {
        let span = tracing::info_span!(
            "dispatch",
            email_id = %job.email_id,
            attachment_count = job.attachment_keys.len(),
            status = tracing::field::Empty,
        );
        let this = self.clone();
        self.tracker.spawn(
            async move {
                this.run(job).await;
            }
            .instrument(span),
        );
    }

    /// Runs one job to completion and records its outcome.
    ///
    /// The attempt itself runs in a nested task, so a panic while composing
    /// or delivering is turned into a `failure` record instead of being lost.
    pub async fn run(&self, job: DispatchJob) -> DispatchOutcome {
        let started = Instant::now();
        let email_id = job.email_id;
        let context = job.context.clone();
        let message_length = job.request.approximate_length();

        let this = self.clone();
        let attempt = tokio::spawn(async move { this.attempt(job).await }.in_current_span()).await;

        let Attempt { outcome, debug_dump } = match attempt {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::error!(error = %e, "Dispatch task aborted");
                Attempt {
                    outcome: DispatchOutcome::new(
                        email_id,
                        DispatchStatus::Failure,
                        format!("Failed to send email: {e}"),
                        &context,
                        message_length,
                    ),
                    debug_dump: None,
                }
            }
        };

        tracing::Span::current().record("status", outcome.status.as_str());

        if let Err(e) = self.recorder.record(&outcome).await {
            tracing::error!(error = %e, "Failed to persist outcome record");
        }

        if let Some(dump) = debug_dump
            && let Err(e) = self.recorder.record_debug(outcome.timestamp.date(), email_id, &dump).await
        {
            tracing::error!(error = %e, "Failed to persist debug dump");
        }

        self.metrics.dispatched.add(1, &[KeyValue::new("status", outcome.status.as_str())]);
        self.metrics.duration.record(started.elapsed().as_secs_f64(), &[]);

        outcome
    }

    async fn attempt(&self, job: DispatchJob) -> Attempt {
        let DispatchJob { email_id, request, context, attachment_keys } = job;
        let failure = |detail: String, length: usize| Attempt {
            outcome: DispatchOutcome::new(email_id, DispatchStatus::Failure, detail, &context, length),
            debug_dump: None,
        };

        let resolved = if attachment_keys.is_empty() {
            Vec::new()
        } else {
            let fetched = match &self.attachments {
                Some(service) => service.resolve(&attachment_keys).await.map_err(|e| e.to_string()),
                None => Err("attachment storage is not configured".to_string()),
            };
            match fetched {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch staged attachments");
                    return failure(format!("Failed to add attachment: {e}"), 0);
                }
            }
        };

        let message_length = request.approximate_length();

        let composed = match self.composer.compose(&request, resolved, email_id) {
            Ok(composed) => composed,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compose message");
                return failure(format!("Failed to send email: {e}"), message_length);
            }
        };

        let debug_dump = request.debug.then(|| composed.formatted());

        if let Err(e) = self.transport.deliver(composed.into_message()).await {
            tracing::warn!(error = %e, "Delivery failed");
            return failure(format!("Failed to send email: {e}"), message_length);
        }

        tracing::info!("Email delivered");
        Attempt {
            outcome: DispatchOutcome::new(email_id, DispatchStatus::Success, SENT_DETAIL, &context, message_length),
            debug_dump,
        }
    }

    /// Number of dispatches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops tracking new work and waits up to `timeout` for in-flight
    /// dispatches. Returns `false` if the deadline passed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::smtp::TransportError;
    use crate::adapters::storage::{MemoryStorage, ObjectStorage};
    use crate::domain::attachment::{AttachmentLimits, AttachmentUpload, object_key};
    use crate::services::composer::SenderIdentity;
    use async_trait::async_trait;
    use bytes::Bytes;
    use lettre::Message;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MailTransport for Recording {
        async fn deliver(&self, message: Message) -> Result<(), TransportError> {
            self.sent.lock().await.push(message.formatted());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Refusing;

    #[async_trait]
    impl MailTransport for Refusing {
        async fn deliver(&self, _message: Message) -> Result<(), TransportError> {
            Err(TransportError::Delivery("554 relay access denied".into()))
        }
    }

    #[derive(Debug)]
    struct Exploding;

    #[async_trait]
    impl MailTransport for Exploding {
        #[allow(clippy::panic)]
        async fn deliver(&self, _message: Message) -> Result<(), TransportError> {
            panic!("transport bug");
        }
    }

    fn composer() -> MessageComposer {
        MessageComposer::new(SenderIdentity {
            address: "sender@example.com".into(),
            display: "sender@example.com".into(),
            domain: "example.com".into(),
            authenticated: true,
        })
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("mail-gateway-dispatch-{}", Uuid::new_v4()))
    }

    fn job(debug: bool) -> DispatchJob {
        DispatchJob {
            email_id: Uuid::new_v4(),
            request: EmailRequest {
                recipient_email: "user@example.com".into(),
                subject: "Hi".into(),
                body: "Hello".into(),
                body_type: "plain".into(),
                debug,
            },
            context: RequestContext { client_ip: "198.51.100.4".into(), ..RequestContext::default() },
            attachment_keys: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let root = temp_root();
        let transport = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(composer(), transport.clone(), None, ResultRecorder::new(&root));

        let job = job(false);
        let id = job.email_id;
        let outcome = dispatcher.run(job).await;

        assert_eq!(outcome.status, DispatchStatus::Success);
        assert_eq!(outcome.detail, "Email sent successfully");
        assert_eq!(outcome.message_length, "user@example.com".len() + 2 + 5);
        assert_eq!(outcome.client_ip, "198.51.100.4");

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let text = String::from_utf8_lossy(&sent[0]);
        assert!(text.contains(&format!("<{id}@example.com>")), "{text}");

        let path = ResultRecorder::new(&root).outcome_path(&outcome);
        assert!(path.exists());
        assert!(!path.parent().unwrap().parent().unwrap().join("debug").exists());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_debug_flag_writes_dump_on_success() {
        let root = temp_root();
        let recorder = ResultRecorder::new(&root);
        let dispatcher = Dispatcher::new(composer(), Arc::new(Recording::default()), None, recorder.clone());

        let job = job(true);
        let id = job.email_id;
        let outcome = dispatcher.run(job).await;

        let dump_path = recorder.debug_path(outcome.timestamp.date(), id);
        let dump = std::fs::read_to_string(dump_path).unwrap();
        assert!(dump.contains("Subject: Hi"), "{dump}");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded_not_retried() {
        let root = temp_root();
        let recorder = ResultRecorder::new(&root);
        let dispatcher = Dispatcher::new(composer(), Arc::new(Refusing), None, recorder.clone());

        let outcome = dispatcher.run(job(true)).await;

        assert_eq!(outcome.status, DispatchStatus::Failure);
        assert_eq!(outcome.detail, "Failed to send email: 554 relay access denied");
        assert!(recorder.outcome_path(&outcome).ends_with(format!("failure/{}.json", outcome.email_id)));
        assert!(recorder.outcome_path(&outcome).exists());
        assert!(!recorder.debug_path(outcome.timestamp.date(), outcome.email_id).exists());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_panic_in_transport_becomes_failure() {
        let root = temp_root();
        let dispatcher = Dispatcher::new(composer(), Arc::new(Exploding), None, ResultRecorder::new(&root));

        let outcome = dispatcher.run(job(false)).await;
        assert_eq!(outcome.status, DispatchStatus::Failure);
        assert!(outcome.detail.starts_with("Failed to send email"), "{}", outcome.detail);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_with_zero_length() {
        let root = temp_root();
        let storage = Arc::new(MemoryStorage::new());
        let service = AttachmentService::new(storage.clone(), AttachmentLimits { max_count: 2, max_size_bytes: 1024 });
        let transport = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(composer(), transport.clone(), Some(service.clone()), ResultRecorder::new(&root));

        let handles = service.stage_all(vec![AttachmentUpload::new("a.txt", Bytes::from_static(b"abc"))]).await.unwrap();
        storage.delete(&handles[0].key).await.unwrap();

        let mut job = job(false);
        job.attachment_keys = handles.into_iter().map(|h| h.key).collect();
        let outcome = dispatcher.run(job).await;

        assert_eq!(outcome.status, DispatchStatus::Failure);
        assert!(outcome.detail.starts_with("Failed to add attachment: "), "{}", outcome.detail);
        assert_eq!(outcome.message_length, 0);
        assert!(transport.sent.lock().await.is_empty());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_attachment_name_is_decoded_from_key() {
        let root = temp_root();
        let storage = Arc::new(MemoryStorage::new());
        let service = AttachmentService::new(storage.clone(), AttachmentLimits { max_count: 2, max_size_bytes: 1024 });
        let transport = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(composer(), transport.clone(), Some(service.clone()), ResultRecorder::new(&root));

        let staged = service.stage_all(vec![AttachmentUpload::new("notes.txt", Bytes::from_static(b"abc"))]).await.unwrap();
        let raw_key = object_key(Uuid::new_v4(), "q3_report.pdf");
        storage.put(&raw_key, Bytes::from_static(b"%PDF-1.4"), "application/pdf").await.unwrap();

        let mut job = job(false);
        job.attachment_keys = vec![staged[0].key.clone(), raw_key];
        let outcome = dispatcher.run(job).await;
        assert_eq!(outcome.status, DispatchStatus::Success, "{}", outcome.detail);

        let sent = transport.sent.lock().await;
        let text = String::from_utf8_lossy(&sent[0]);
        assert!(text.contains("filename=\"notes.txt\""), "{text}");
        assert!(text.contains("filename=\"q3_report.pdf\""), "{text}");
        assert!(text.contains("application/pdf"), "{text}");
        assert!(!text.contains(&format!("filename=\"{}", staged[0].key)), "{text}");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_background_and_drains() {
        let root = temp_root();
        let recorder = ResultRecorder::new(&root);
        let transport = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(composer(), transport.clone(), None, recorder);

        for _ in 0..5 {
            dispatcher.dispatch(job(false));
        }
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(transport.sent.lock().await.len(), 5);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
