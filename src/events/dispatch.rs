//! Event dispatch
//!
//! The mutation path hands a change record plus a routing condition to an
//! [`EventSink`]. The NATS sink publishes it as JSON on
//! `<prefix>.<event type>`; the memory sink records it for dev mode and tests.

use bson::oid::ObjectId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::events::change::ChangeMap;
use crate::nats::{event_headers, NatsClient};
use crate::types::{MutationError, Result};

/// Delay before the second publish attempt; grows linearly per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Kind of change event
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "user.update")]
    UpdateUser,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::UpdateUser => "user.update",
        }
    }
}

/// Attribute/value pairs consumers filter delivery on
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct EventCondition(BTreeMap<String, String>);

impl EventCondition {
    /// Condition matching events about one object
    pub fn object(id: ObjectId) -> Self {
        Self::default().with("object_id", id.to_hex())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Envelope published for every change
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub condition: EventCondition,
    pub body: ChangeMap,
    pub timestamp: DateTime<Utc>,
}

/// Where change events are handed off
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &ChangeEvent) -> Result<()>;
}

/// Publishes change events to NATS
pub struct NatsEventSink {
    nats: NatsClient,
    subject_prefix: String,
}

impl NatsEventSink {
    pub fn new(nats: NatsClient, subject_prefix: impl Into<String>) -> Self {
        Self {
            nats,
            subject_prefix: subject_prefix.into(),
        }
    }

    fn subject(&self, event_type: EventType) -> String {
        format!("{}.{}", self.subject_prefix, event_type.as_str())
    }
}

#[async_trait::async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| MutationError::Internal(format!("failed to encode event: {}", e)))?;
        let headers = event_headers(&event.id.to_string(), event.event_type.as_str());

        self.nats
            .publish_with_headers(&self.subject(event.event_type), headers, Bytes::from(payload))
            .await?;
        self.nats.flush().await
    }
}

/// Keeps published events in memory
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ChangeEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far
    pub async fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Hands change records to a sink, retrying failed publishes
#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    attempts: u32,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>, attempts: u32) -> Self {
        Self {
            sink,
            attempts: attempts.max(1),
        }
    }

    /// Publish `body` under `event_type`.
    ///
    /// Runs after the write has been acknowledged, so it takes no cancellation
    /// token and never fails the caller: the last error is logged and returned
    /// only for inspection.
    pub async fn dispatch(
        &self,
        event_type: EventType,
        body: ChangeMap,
        condition: EventCondition,
    ) -> Result<Uuid> {
        let event = ChangeEvent {
            id: Uuid::new_v4(),
            event_type,
            condition,
            body,
            timestamp: Utc::now(),
        };

        let mut attempt = 1;
        loop {
            match self.sink.publish(&event).await {
                Ok(()) => {
                    debug!(
                        event_id = %event.id,
                        event_type = event_type.as_str(),
                        object_id = %event.body.id,
                        "change event dispatched"
                    );
                    return Ok(event.id);
                }
                Err(e) if attempt < self.attempts => {
                    warn!(
                        event_id = %event.id,
                        attempt,
                        error = %e,
                        "change event publish failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        event_id = %event.id,
                        event_type = event_type.as_str(),
                        object_id = %event.body.id,
                        attempts = attempt,
                        error = %e,
                        "change event dropped after retries"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Actor, RolePermission};
    use crate::db::schemas::UserDoc;
    use crate::events::model::ObjectKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` publishes
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryEventSink,
    }

    #[async_trait::async_trait]
    impl EventSink for FlakySink {
        async fn publish(&self, event: &ChangeEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(MutationError::Nats("broker unavailable".into()));
            }
            self.inner.publish(event).await
        }
    }

    fn body() -> ChangeMap {
        let user = UserDoc::new("alice");
        let actor = Actor::with_permissions(&user, RolePermission::NONE);
        ChangeMap::new(user.id, ObjectKind::User, &actor)
    }

    #[tokio::test]
    async fn test_dispatch_records_event_with_condition() {
        let sink = Arc::new(MemoryEventSink::new());
        let dispatcher = EventDispatcher::new(sink.clone(), 1);
        let id = ObjectId::new();

        dispatcher
            .dispatch(EventType::UpdateUser, body(), EventCondition::object(id))
            .await
            .unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].condition.get("object_id"), Some(id.to_hex().as_str()));
    }

    #[tokio::test]
    async fn test_dispatch_retries_then_succeeds() {
        let sink = Arc::new(FlakySink {
            failures: 2,
            calls: AtomicU32::new(0),
            inner: MemoryEventSink::new(),
        });
        let dispatcher = EventDispatcher::new(sink.clone(), 3);

        let result = dispatcher
            .dispatch(EventType::UpdateUser, body(), EventCondition::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.inner.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_gives_up_after_attempts() {
        let sink = Arc::new(FlakySink {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            inner: MemoryEventSink::new(),
        });
        let dispatcher = EventDispatcher::new(sink.clone(), 2);

        let result = dispatcher
            .dispatch(EventType::UpdateUser, body(), EventCondition::default())
            .await;
        assert!(matches!(result, Err(MutationError::Nats(_))));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_type_wire_name() {
        let json = serde_json::to_string(&EventType::UpdateUser).unwrap();
        assert_eq!(json, "\"user.update\"");
    }
}
