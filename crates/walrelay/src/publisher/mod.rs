//! Publisher adapters
//!
//! The relay treats the downstream bus as fire-and-forget: events are
//! serialized to JSON and written to one topic; failures are reported back
//! as errors and the caller decides (the session logs them and moves on).

#[cfg(feature = "redis")]
mod redis;
mod stdout;

use async_trait::async_trait;

#[cfg(feature = "redis")]
pub use self::redis::RedisPublisher;
pub use stdout::StdoutPublisher;

use crate::common::{ChangeEvent, Result};

/// Downstream transport for change events.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver one event to `topic`.
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingPublisher {
        published: Mutex<Vec<(String, ChangeEvent)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), event.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publisher_is_object_safe() {
        use crate::common::ActionKind;
        use std::collections::BTreeMap;

        let recorder = RecordingPublisher {
            published: Mutex::new(Vec::new()),
        };
        let publisher: &dyn Publisher = &recorder;

        let event = ChangeEvent {
            id: uuid::Uuid::new_v4(),
            schema: "public".to_string(),
            table: "t".to_string(),
            action: ActionKind::Insert,
            data: BTreeMap::new(),
            data_old: BTreeMap::new(),
            commit_time: chrono::Utc::now(),
        };
        publisher.publish("t", &event).await.unwrap();

        let published = recorder.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "t");
    }
}
