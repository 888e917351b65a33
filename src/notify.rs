//! Lifecycle notifications.
//!
//! Engines push [`NotificationEvent`]s onto an unbounded channel after their
//! store write has succeeded. A dispatcher task drains the channel and hands
//! each event to every configured [`NotificationSink`]. Neither a full nor a
//! closed channel, nor a failing sink, is ever reported back to the request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::Role;
use crate::config::AppConfig;
use crate::models::{ChangeRequestStatus, ProjectStatus, SignerType, WorkStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    UserRegistered {
        user_id: Uuid,
        email: String,
        role: Role,
    },
    ProjectStatusChanged {
        project_id: Uuid,
        from: ProjectStatus,
        to: ProjectStatus,
        changed_by: Uuid,
    },
    ChangeRequestSubmitted {
        project_id: Uuid,
        request_id: Uuid,
        requested_by: Uuid,
        sections: Vec<String>,
    },
    ChangeRequestReviewed {
        project_id: Uuid,
        request_id: Uuid,
        requested_by: Uuid,
        status: ChangeRequestStatus,
        reviewed_by: Uuid,
    },
    WorkOrderStatusChanged {
        work_order_id: Uuid,
        work_order_number: String,
        from: WorkStatus,
        to: WorkStatus,
        changed_by: Uuid,
    },
    WorkOrderCompleted {
        work_order_id: Uuid,
        work_order_number: String,
        completed_by: Uuid,
        completed_at: DateTime<Utc>,
    },
    WorkOrderSigned {
        work_order_id: Uuid,
        signer_type: SignerType,
        signer_name: String,
    },
    DocumentShared {
        document_id: Uuid,
        client_id: Uuid,
        can_download: bool,
        shared_by: Uuid,
    },
    /// Carries the raw invitation token; this event is the only place it exists.
    ProjectInvitation {
        project_id: Uuid,
        invitation_id: Uuid,
        email: String,
        token: String,
        expires_at: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::UserRegistered { .. } => "user_registered",
            NotificationEvent::ProjectStatusChanged { .. } => "project_status_changed",
            NotificationEvent::ChangeRequestSubmitted { .. } => "change_request_submitted",
            NotificationEvent::ChangeRequestReviewed { .. } => "change_request_reviewed",
            NotificationEvent::WorkOrderStatusChanged { .. } => "work_order_status_changed",
            NotificationEvent::WorkOrderCompleted { .. } => "work_order_completed",
            NotificationEvent::WorkOrderSigned { .. } => "work_order_signed",
            NotificationEvent::DocumentShared { .. } => "document_shared",
            NotificationEvent::ProjectInvitation { .. } => "project_invitation",
        }
    }
}

/// Sending half handed to the lifecycle engines.
#[derive(Clone)]
pub struct Notifier {
    sender: UnboundedSender<NotificationEvent>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<NotificationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn dispatch(&self, event: NotificationEvent) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            warn!(event = kind, "notification dropped, dispatcher is not running");
        } else {
            debug!(event = kind, "notification queued");
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}

/// Writes every event to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let payload = log_payload(event)?;
        info!(event = event.kind(), %payload, "notification");
        Ok(())
    }
}

/// The event as JSON with secrets masked. Invitation tokens only ever leave
/// the process through the delivering sinks, never through the log.
fn log_payload(event: &NotificationEvent) -> Result<Value> {
    let mut payload = serde_json::to_value(event).context("failed to encode notification")?;
    if let Some(token) = payload.get_mut("token") {
        *token = Value::String("[redacted]".to_string());
    }
    Ok(payload)
}

/// Posts every event as JSON to a fixed URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// A hung endpoint holds up the dispatcher for at most `timeout` per event.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notification webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("failed to reach notification webhook")?
            .error_for_status()
            .context("notification webhook rejected event")?;
        Ok(())
    }
}

pub fn default_sinks(config: &AppConfig) -> Result<Vec<Arc<dyn NotificationSink>>> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    if let Some(url) = &config.notification_webhook_url {
        let timeout = Duration::from_secs(config.notification_webhook_timeout_secs);
        sinks.push(Arc::new(WebhookSink::new(url.clone(), timeout)?));
    }
    Ok(sinks)
}

/// Drains the queue until every [`Notifier`] has been dropped.
pub async fn run_dispatcher(
    mut receiver: UnboundedReceiver<NotificationEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
) {
    info!(sinks = sinks.len(), "notification dispatcher started");
    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            if let Err(err) = sink.deliver(&event).await {
                warn!(
                    sink = sink.name(),
                    event = event.kind(),
                    error = %err,
                    "notification delivery failed"
                );
            }
        }
    }
    info!("notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
            self.seen.lock().await.push(event.kind());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _event: &NotificationEvent) -> Result<()> {
            Err(anyhow!("smtp down"))
        }
    }

    fn shared(document_id: Uuid) -> NotificationEvent {
        NotificationEvent::DocumentShared {
            document_id,
            client_id: Uuid::new_v4(),
            can_download: true,
            shared_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn events_serialize_with_a_snake_case_tag() {
        let value = serde_json::to_value(NotificationEvent::ProjectStatusChanged {
            project_id: Uuid::nil(),
            from: ProjectStatus::Active,
            to: ProjectStatus::OnHold,
            changed_by: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["event"], "project_status_changed");
        assert_eq!(value["to"], "on_hold");
    }

    #[tokio::test]
    async fn dispatcher_keeps_delivering_after_a_sink_fails() {
        let (notifier, receiver) = Notifier::channel();
        let recorder = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(FailingSink), recorder.clone()];

        notifier.dispatch(shared(Uuid::new_v4()));
        notifier.dispatch(shared(Uuid::new_v4()));
        drop(notifier);

        run_dispatcher(receiver, sinks).await;
        assert_eq!(
            *recorder.seen.lock().await,
            vec!["document_shared", "document_shared"]
        );
    }

    #[test]
    fn logged_invitations_hide_the_token() {
        let event = NotificationEvent::ProjectInvitation {
            project_id: Uuid::nil(),
            invitation_id: Uuid::nil(),
            email: "guest@example.com".to_string(),
            token: "f00dfacecafe".to_string(),
            expires_at: Utc::now(),
        };
        let payload = log_payload(&event).unwrap();
        assert!(!payload.to_string().contains("f00dfacecafe"));
        assert_eq!(payload["token"], "[redacted]");
        assert_eq!(payload["email"], "guest@example.com");

        let shared = log_payload(&shared(Uuid::nil())).unwrap();
        assert!(shared.get("token").is_none());
    }

    #[tokio::test]
    async fn hung_webhooks_give_up_after_the_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let sink =
            WebhookSink::new(format!("http://{addr}/hook"), Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        assert!(sink.deliver(&shared(Uuid::nil())).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[test]
    fn dispatch_without_a_receiver_is_silent() {
        let (notifier, receiver) = Notifier::channel();
        drop(receiver);
        notifier.dispatch(shared(Uuid::new_v4()));
    }
}
