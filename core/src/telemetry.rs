//! Protocol telemetry
//!
//! Emission never blocks and never fails: records go onto an unbounded
//! channel and a background task hands them to a [`TelemetryCollector`].
//! Collector errors are logged and dropped. Conversation and user ids are
//! only ever sent as namespaced SHA-256 hashes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::error::CoreResult;

const HASH_NAMESPACE: &str = "sihbolt:";
const INGEST_ENDPOINT: &str = "/functions/v1/telemetry-ingest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    MessageEncrypted,
    MessageDecryptSuccess,
    MessageDecryptDestroyed,
    MessageSendError,
    RatchetReset,
    KeyRotation,
}

impl TelemetryEvent {
    pub fn severity(self) -> Severity {
        match self {
            Self::MessageEncrypted | Self::MessageDecryptSuccess | Self::KeyRotation => {
                Severity::Info
            }
            Self::MessageDecryptDestroyed | Self::MessageSendError | Self::RatchetReset => {
                Severity::Warning
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One telemetry event as sent to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub event: TelemetryEvent,
    pub severity: Severity,
    #[serde(rename = "conversation")]
    pub conversation_hash: Option<String>,
    #[serde(rename = "actor")]
    pub actor_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub meta: serde_json::Value,
}

/// Namespaced SHA-256 of an identifier, hex encoded
pub fn hash_identifier(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_NAMESPACE.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Destination for telemetry records
#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    async fn collect(&self, record: &TelemetryRecord) -> CoreResult<()>;
}

/// Collector posting to the relay's ingest function
pub struct HttpCollector {
    api: ApiClient,
}

impl HttpCollector {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TelemetryCollector for HttpCollector {
    async fn collect(&self, record: &TelemetryRecord) -> CoreResult<()> {
        self.api.post_no_content(INGEST_ENDPOINT, record, None).await
    }
}

/// Cheap, cloneable handle used to emit events
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    sender: Option<mpsc::UnboundedSender<TelemetryRecord>>,
}

impl Telemetry {
    /// Handle that drops every event
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Start a forwarding task for `collector`; must run inside a tokio runtime
    pub fn spawn(collector: Arc<dyn TelemetryCollector>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TelemetryRecord>();

        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(e) = collector.collect(&record).await {
                    tracing::debug!("Telemetry delivery failed for {:?}: {}", record.event, e);
                }
            }
        });

        Self {
            sender: Some(sender),
        }
    }

    /// Handle plus the receiving end, for inspecting events in tests
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TelemetryRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Record an event with its default severity
    pub fn emit(
        &self,
        event: TelemetryEvent,
        conversation_id: Option<&str>,
        actor_id: &str,
        meta: serde_json::Value,
    ) {
        self.emit_with_severity(event, event.severity(), conversation_id, actor_id, meta);
    }

    pub fn emit_with_severity(
        &self,
        event: TelemetryEvent,
        severity: Severity,
        conversation_id: Option<&str>,
        actor_id: &str,
        meta: serde_json::Value,
    ) {
        let Some(sender) = &self.sender else {
            return;
        };

        let record = TelemetryRecord {
            event,
            severity,
            conversation_hash: conversation_id.map(hash_identifier),
            actor_hash: Some(hash_identifier(actor_id)),
            timestamp: Utc::now(),
            meta,
        };

        if sender.send(record).is_err() {
            tracing::debug!("Telemetry worker has stopped, dropping {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCollector {
        records: Mutex<Vec<TelemetryRecord>>,
    }

    #[async_trait]
    impl TelemetryCollector for RecordingCollector {
        async fn collect(&self, record: &TelemetryRecord) -> CoreResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingCollector;

    #[async_trait]
    impl TelemetryCollector for FailingCollector {
        async fn collect(&self, _record: &TelemetryRecord) -> CoreResult<()> {
            Err(crate::error::CoreError::Directory("ingest down".to_string()))
        }
    }

    #[test]
    fn test_hash_is_namespaced_and_stable() {
        let hash = hash_identifier("conversation-1");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_identifier("conversation-1"));
        assert_ne!(hash, hash_identifier("conversation-2"));

        let bare = hex::encode(Sha256::digest(b"conversation-1"));
        assert_ne!(hash, bare);
    }

    #[test]
    fn test_record_json_shape() {
        let (telemetry, mut receiver) = Telemetry::channel();
        telemetry.emit(
            TelemetryEvent::MessageDecryptDestroyed,
            Some("c1"),
            "alice",
            serde_json::json!({ "reason": "tampered" }),
        );

        let record = receiver.try_recv().unwrap();
        assert_eq!(record.severity, Severity::Warning);
        assert_eq!(record.conversation_hash, Some(hash_identifier("c1")));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "message_decrypt_destroyed");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["conversation"], hash_identifier("c1"));
        assert_eq!(json["actor"], hash_identifier("alice"));
        assert!(json.get("conversationHash").is_none());
        assert!(json.get("actorHash").is_none());
        assert_eq!(json["meta"]["reason"], "tampered");
    }

    #[test]
    fn test_disabled_and_dropped_receivers_are_silent() {
        Telemetry::disabled().emit(TelemetryEvent::KeyRotation, None, "alice", serde_json::Value::Null);

        let (telemetry, receiver) = Telemetry::channel();
        drop(receiver);
        telemetry.emit(TelemetryEvent::KeyRotation, None, "alice", serde_json::Value::Null);
        assert!(telemetry.is_enabled());
    }

    #[tokio::test]
    async fn test_worker_forwards_and_survives_failures() {
        let failing = Telemetry::spawn(Arc::new(FailingCollector));
        failing.emit(TelemetryEvent::MessageSendError, Some("c1"), "alice", serde_json::Value::Null);

        let collector = Arc::new(RecordingCollector::default());
        let telemetry = Telemetry::spawn(collector.clone());
        telemetry.emit(TelemetryEvent::MessageEncrypted, Some("c1"), "alice", serde_json::Value::Null);
        telemetry.emit(TelemetryEvent::RatchetReset, Some("c1"), "alice", serde_json::Value::Null);

        for _ in 0..100 {
            if collector.records.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let records = collector.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, TelemetryEvent::MessageEncrypted);
        assert_eq!(records[1].severity, Severity::Warning);
    }
}
