use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::platform::dual_write::DualWriter;
use crate::platform::error::PlatformError;
use crate::platform::observer_registry::ObserverRegistry;
use crate::platform::store::LogEntry;
use crate::proto::platform::{LogData, StreamMessage};

pub const MESSAGE_TYPE_LOG: &str = "log";
pub const MESSAGE_TYPE_PING: &str = "ping";

/// What observers receive, e.g.
/// `{"type":"log","data":{"applicationId":..,"source":..,"content":..,"timestamp":..}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BroadcastMessage {
    Log(LogEntry),
    Ping,
}

impl From<&LogEntry> for LogData {
    fn from(entry: &LogEntry) -> Self {
        LogData {
            application_id: entry.application_id.clone(),
            source: entry.source.clone(),
            content: entry.content.clone(),
            timestamp: entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl TryFrom<LogData> for LogEntry {
    type Error = PlatformError;

    fn try_from(data: LogData) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&data.timestamp)
            .map_err(|e| PlatformError::InvalidArgument(format!("bad log timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(LogEntry {
            application_id: data.application_id,
            source: data.source,
            content: data.content,
            timestamp,
        })
    }
}

impl From<BroadcastMessage> for StreamMessage {
    fn from(message: BroadcastMessage) -> Self {
        match message {
            BroadcastMessage::Log(entry) => StreamMessage {
                r#type: MESSAGE_TYPE_LOG.to_string(),
                data: Some(LogData::from(&entry)),
            },
            BroadcastMessage::Ping => StreamMessage {
                r#type: MESSAGE_TYPE_PING.to_string(),
                data: None,
            },
        }
    }
}

impl TryFrom<StreamMessage> for BroadcastMessage {
    type Error = PlatformError;

    fn try_from(message: StreamMessage) -> Result<Self, Self::Error> {
        match (message.r#type.as_str(), message.data) {
            (MESSAGE_TYPE_LOG, Some(data)) => Ok(BroadcastMessage::Log(data.try_into()?)),
            (MESSAGE_TYPE_PING, _) => Ok(BroadcastMessage::Ping),
            (other, _) => Err(PlatformError::InvalidArgument(format!(
                "unexpected stream message type {other:?}"
            ))),
        }
    }
}

/// Recent log lines and where they came from
#[derive(Debug, Clone, PartialEq)]
pub struct RecentLogs {
    /// Oldest first
    pub entries: Vec<LogEntry>,
    pub from_cache: bool,
}

/// Fans log lines out to live observers and persists them.
pub struct LogBroadcaster {
    observers: Arc<ObserverRegistry>,
    writer: Arc<DualWriter>,
}

impl LogBroadcaster {
    pub fn new(observers: Arc<ObserverRegistry>, writer: Arc<DualWriter>) -> Self {
        Self { observers, writer }
    }

    /// Fan out first, then persist. Returns once the durable append has
    /// completed; only a durable failure fails the call.
    pub async fn publish(
        &self,
        app_id: &str,
        source: &str,
        content: &str,
    ) -> Result<LogEntry, PlatformError> {
        let entry = LogEntry::now(app_id, source, content);

        let frame = StreamMessage::from(BroadcastMessage::Log(entry.clone()));
        self.observers.broadcast(&frame);

        self.writer.append_log(&entry).await?;
        Ok(entry)
    }

    /// The bounded list when warm, otherwise the latest durable rows
    pub async fn recent_logs(&self, app_id: &str) -> Result<RecentLogs, PlatformError> {
        match self.writer.cached_logs(app_id).await {
            Ok(entries) if !entries.is_empty() => {
                return Ok(RecentLogs {
                    entries,
                    from_cache: true,
                })
            }
            Ok(_) => {}
            Err(e) => warn!("Recent-log cache read failed for application {app_id}: {e}"),
        }

        let entries = self
            .writer
            .store()
            .recent_logs(app_id, self.writer.recent_log_limit())
            .await?;
        Ok(RecentLogs {
            entries,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::cache::{logs_key, InMemoryCache, RecentLogCache};
    use crate::platform::db::CacheConfig;
    use crate::platform::observer_registry::ObserverTxChannel;
    use crate::platform::store::DurableStore;
    use crate::test_harness::{FailingCache, MemoryStore};
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<InMemoryCache>,
        observers: Arc<ObserverRegistry>,
        broadcaster: LogBroadcaster,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.create_application("a1", "app-one", "us").await.unwrap();
        let cache = Arc::new(InMemoryCache::new());
        let observers = Arc::new(ObserverRegistry::new());
        let writer = Arc::new(DualWriter::new(
            store.clone(),
            cache.clone(),
            &CacheConfig::default(),
        ));
        let broadcaster = LogBroadcaster::new(observers.clone(), writer);
        Fixture {
            store,
            cache,
            observers,
            broadcaster,
        }
    }

    fn observer(registry: &ObserverRegistry) -> mpsc::Receiver<Result<StreamMessage, tonic::Status>> {
        let (tx, rx): (ObserverTxChannel, _) = mpsc::channel(16);
        registry.register(Uuid::new_v4(), tx);
        rx
    }

    #[tokio::test]
    async fn test_publish_fans_out_and_persists() {
        let f = fixture().await;
        let mut rx = observer(&f.observers);

        let entry = f.broadcaster.publish("a1", "app", "booted").await.unwrap();

        let frame = rx.recv().await.unwrap().unwrap();
        assert_eq!(frame.r#type, "log");
        let data = frame.data.unwrap();
        assert_eq!(data.application_id, "a1");
        assert_eq!(data.content, "booted");

        let durable = f.store.recent_logs("a1", 100).await.unwrap();
        assert_eq!(durable, vec![entry]);
    }

    #[tokio::test]
    async fn test_bounded_list_keeps_latest_hundred() {
        let f = fixture().await;
        for i in 1..=105 {
            f.broadcaster
                .publish("a1", "app", &i.to_string())
                .await
                .unwrap();
        }

        let raw = f.cache.list(&logs_key("a1")).await.unwrap();
        let contents: Vec<String> = raw
            .iter()
            .map(|payload| serde_json::from_str::<LogEntry>(payload).unwrap().content)
            .collect();
        let expected: Vec<String> = (6..=105).rev().map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);

        assert_eq!(f.store.log_count("a1"), 105);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_stay_bounded() {
        let f = Arc::new(fixture().await);
        let mut handles = Vec::new();
        for worker in 0..8 {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..40 {
                    f.broadcaster
                        .publish("a1", "app", &format!("{worker}-{i}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(f.cache.list(&logs_key("a1")).await.unwrap().len(), 100);
        assert_eq!(f.store.log_count("a1"), 320);
    }

    #[tokio::test]
    async fn test_recent_logs_prefers_cache_then_falls_back() {
        let f = fixture().await;
        for content in ["one", "two", "three"] {
            f.broadcaster.publish("a1", "app", content).await.unwrap();
        }

        let warm = f.broadcaster.recent_logs("a1").await.unwrap();
        assert!(warm.from_cache);
        let contents: Vec<_> = warm.entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);

        f.cache.delete(&logs_key("a1")).await.unwrap();
        let cold = f.broadcaster.recent_logs("a1").await.unwrap();
        assert!(!cold.from_cache);
        assert_eq!(cold.entries, warm.entries);
    }

    #[tokio::test]
    async fn test_cache_failure_is_absorbed() {
        let store = Arc::new(MemoryStore::new());
        store.create_application("a1", "app-one", "us").await.unwrap();
        let writer = Arc::new(DualWriter::new(
            store.clone(),
            Arc::new(FailingCache),
            &CacheConfig::default(),
        ));
        let broadcaster = LogBroadcaster::new(Arc::new(ObserverRegistry::new()), writer);

        broadcaster.publish("a1", "app", "still here").await.unwrap();

        assert_eq!(store.log_count("a1"), 1);
        let logs = broadcaster.recent_logs("a1").await.unwrap();
        assert!(!logs.from_cache);
        assert_eq!(logs.entries[0].content, "still here");
    }

    #[tokio::test]
    async fn test_durable_failure_fails_publish() {
        let f = fixture().await;
        f.store.fail_log_writes(true);

        let result = f.broadcaster.publish("a1", "app", "lost").await;

        assert!(matches!(result, Err(PlatformError::Unavailable(_))));
        assert!(f.cache.list(&logs_key("a1")).await.unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_message_json_shape() {
        let entry = LogEntry {
            application_id: "a1".to_string(),
            source: "build".to_string(),
            content: "-----> Launching...".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T10:00:00.250Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let value = serde_json::to_value(BroadcastMessage::Log(entry.clone())).unwrap();
        assert_eq!(value["type"], json!("log"));
        assert_eq!(value["data"]["applicationId"], json!("a1"));
        assert_eq!(value["data"]["source"], json!("build"));
        assert_eq!(value["data"]["content"], json!("-----> Launching..."));

        let frame = StreamMessage::from(BroadcastMessage::Log(entry.clone()));
        assert_eq!(
            frame.data.as_ref().unwrap().timestamp,
            "2024-05-01T10:00:00.250Z"
        );
        assert_eq!(
            BroadcastMessage::try_from(frame).unwrap(),
            BroadcastMessage::Log(entry)
        );

        let ping = serde_json::to_value(BroadcastMessage::Ping).unwrap();
        assert_eq!(ping, json!({"type": "ping"}));
    }
}
