//! Push-messaging client.
//!
//! Delivery is delegated to a hosted messaging service. `PushSender` is the
//! seam: the server talks to the real service through [`FcmSender`], runs
//! without credentials through [`LogSender`], and tests record messages
//! with [`MemorySender`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::garage_config::{PushBackend, PushConfig};

const FCM_SEND_URL: &str = "https://fcm.googleapis.com/v1/projects/{project}/messages:send";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

/// A push message addressed to one device token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushMessage {
    pub token: String,
    pub notification: Notification,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(token: &str, title: &str, body: &str) -> Self {
        Self {
            token: token.to_string(),
            notification: Notification {
                title: title.to_string(),
                body: body.to_string(),
                icon: None,
            },
            data: BTreeMap::new(),
        }
    }

    pub fn with_icon(mut self, icon: Option<&str>) -> Self {
        self.notification.icon = icon.map(str::to_string);
        self
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

/// Sends push messages. Returns the provider's message id.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<String>;
}

// ── FCM HTTP v1 ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webpush: Option<FcmWebpush<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    data: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmWebpush<'a> {
    notification: FcmWebpushNotification<'a>,
}

#[derive(Serialize)]
struct FcmWebpushNotification<'a> {
    icon: &'a str,
}

#[derive(Deserialize)]
struct FcmResponse {
    name: String,
}

pub struct FcmSender {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl FcmSender {
    pub fn new(endpoint: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            access_token,
        }
    }

    /// Default send endpoint for a project.
    pub fn endpoint_for(project_id: &str) -> String {
        FCM_SEND_URL.replace("{project}", project_id)
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, message: &PushMessage) -> Result<String> {
        let body = FcmRequest {
            message: FcmMessage {
                token: &message.token,
                notification: FcmNotification {
                    title: &message.notification.title,
                    body: &message.notification.body,
                },
                webpush: message.notification.icon.as_deref().map(|icon| FcmWebpush {
                    notification: FcmWebpushNotification { icon },
                }),
                data: &message.data,
            },
        };

        let resp: FcmResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("Failed to send push request")?
            .error_for_status()
            .context("Push service returned error status")?
            .json()
            .await
            .context("Failed to parse push service response")?;
        Ok(resp.name)
    }
}

// ── Log-only sender ───────────────────────────────────────────────────

/// Logs messages instead of delivering them.
#[derive(Default)]
pub struct LogSender {
    next_id: AtomicU64,
}

#[async_trait]
impl PushSender for LogSender {
    async fn send(&self, message: &PushMessage) -> Result<String> {
        let id = format!("log-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::info!(
            message_id = %id,
            title = %message.notification.title,
            body = %message.notification.body,
            "push message (not delivered, log backend)"
        );
        Ok(id)
    }
}

// ── In-memory sender ──────────────────────────────────────────────────

/// Records messages in memory. Can be told to fail every send.
#[derive(Default)]
pub struct MemorySender {
    sent: Mutex<Vec<PushMessage>>,
    fail: bool,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushSender for MemorySender {
    async fn send(&self, message: &PushMessage) -> Result<String> {
        if self.fail {
            anyhow::bail!("push service unavailable");
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow::anyhow!("push log lock poisoned"))?;
        sent.push(message.clone());
        Ok(format!("mem-{}", sent.len()))
    }
}

/// Build the sender selected by configuration.
pub fn sender_from_config(config: &PushConfig) -> Result<Box<dyn PushSender>> {
    match config.backend {
        PushBackend::Log => Ok(Box::new(LogSender::default())),
        PushBackend::Fcm => {
            let token = config
                .access_token()
                .context("push backend 'fcm' requires an access token (GARAGE_FCM_ACCESS_TOKEN)")?;
            let endpoint = match (&config.endpoint, &config.project_id) {
                (Some(endpoint), _) => endpoint.clone(),
                (None, Some(project)) => FcmSender::endpoint_for(project),
                (None, None) => {
                    anyhow::bail!("push backend 'fcm' requires project_id or endpoint")
                }
            };
            Ok(Box::new(FcmSender::new(endpoint, token)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use std::sync::Arc;

    #[test]
    fn test_message_builder() {
        let msg = PushMessage::new("tok", "Title", "Body")
            .with_icon(Some("/favicon.png"))
            .with_data("action", "repair_complete");
        assert_eq!(msg.notification.icon.as_deref(), Some("/favicon.png"));
        assert_eq!(msg.data["action"], "repair_complete");
    }

    #[test]
    fn test_endpoint_for_project() {
        assert_eq!(
            FcmSender::endpoint_for("garage-demo"),
            "https://fcm.googleapis.com/v1/projects/garage-demo/messages:send"
        );
    }

    #[tokio::test]
    async fn test_memory_sender_records_and_fails() {
        let sender = MemorySender::new();
        let id = sender.send(&PushMessage::new("t", "a", "b")).await.unwrap();
        assert_eq!(id, "mem-1");
        assert_eq!(sender.sent().len(), 1);

        let failing = MemorySender::failing();
        assert!(failing.send(&PushMessage::new("t", "a", "b")).await.is_err());
        assert!(failing.sent().is_empty());
    }

    #[tokio::test]
    async fn test_log_sender_issues_sequential_ids() {
        let sender = LogSender::default();
        assert_eq!(sender.send(&PushMessage::new("t", "a", "b")).await.unwrap(), "log-1");
        assert_eq!(sender.send(&PushMessage::new("t", "a", "b")).await.unwrap(), "log-2");
    }

    #[test]
    fn test_sender_from_config_fcm_requires_credentials() {
        let config = PushConfig {
            backend: PushBackend::Fcm,
            project_id: Some("demo".into()),
            endpoint: None,
            access_token: None,
            icon: None,
        };
        // SAFETY: tests touching this variable do not run concurrently with readers of it.
        unsafe { std::env::remove_var("GARAGE_FCM_ACCESS_TOKEN") };
        assert!(sender_from_config(&config).is_err());

        let config = PushConfig {
            access_token: Some("secret".into()),
            project_id: None,
            ..config
        };
        assert!(sender_from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_fcm_sender_posts_v1_payload() {
        let captured: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::new(Mutex::new(None));
        let sink = captured.clone();
        let app = Router::new().route(
            "/send",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *sink.lock().unwrap() = Some((auth, body));
                    Json(serde_json::json!({"name": "projects/demo/messages/42"}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sender = FcmSender::new(format!("http://{}/send", addr), "secret".into());
        let msg = PushMessage::new("device-1", "Repair complete", "Ready")
            .with_icon(Some("/favicon.png"))
            .with_data("vehicle_id", "v-1");
        let id = sender.send(&msg).await.unwrap();
        assert_eq!(id, "projects/demo/messages/42");

        let (auth, body) = captured.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer secret");
        assert_eq!(body["message"]["token"], "device-1");
        assert_eq!(body["message"]["notification"]["title"], "Repair complete");
        assert_eq!(body["message"]["webpush"]["notification"]["icon"], "/favicon.png");
        assert_eq!(body["message"]["data"]["vehicle_id"], "v-1");
    }

    #[tokio::test]
    async fn test_fcm_sender_surfaces_error_status() {
        let app = Router::new().route(
            "/send",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sender = FcmSender::new(format!("http://{}/send", addr), "bad".into());
        let err = sender
            .send(&PushMessage::new("device-1", "t", "b"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error status"));
    }
}
