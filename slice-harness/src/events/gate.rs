//! Event-gated admission of stages.

use super::EventReceiver;
use crate::core::{Clipboard, Queue};
use crate::errors::{EventError, HarnessError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A stage's event topic, with its pipeline-scoped broker name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventTopic {
    topic: String,
    scoped: String,
}

impl EventTopic {
    /// Scopes `topic` to `pipeline_name` as `"{topic}_{pipeline_name}"`.
    #[must_use]
    pub fn new(topic: impl Into<String>, pipeline_name: &str) -> Self {
        let topic = topic.into();
        let scoped = format!("{topic}_{pipeline_name}");
        Self { topic, scoped }
    }

    /// The topic as written in the policy; used as the clipboard key.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The name used on the broker.
    #[must_use]
    pub fn scoped(&self) -> &str {
        &self.scoped
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scoped)
    }
}

/// Blocks a stage until its triggering event arrives.
#[derive(Clone)]
pub struct EventGate {
    receiver: Arc<dyn EventReceiver>,
    receive_timeout: Duration,
    retry_delay: Duration,
}

impl fmt::Debug for EventGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGate")
            .field("receive_timeout", &self.receive_timeout)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl EventGate {
    /// Creates a gate over the given receiver.
    #[must_use]
    pub fn new(
        receiver: Arc<dyn EventReceiver>,
        receive_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            receiver,
            receive_timeout,
            retry_delay,
        }
    }

    /// Waits for the next message on `topic`, with no overall deadline.
    ///
    /// Each attempt is bounded by the receive timeout; between attempts the
    /// gate sleeps for the retry delay. Only a transport error ends the wait
    /// without a payload.
    pub async fn wait(&self, topic: &EventTopic) -> Result<serde_json::Value, EventError> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            if let Some(payload) = self
                .receiver
                .receive(topic.scoped(), self.receive_timeout)
                .await?
            {
                debug!(topic = %topic, attempts, "Received event");
                return Ok(payload);
            }
            trace!(topic = %topic, attempts, "No event yet");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Waits for `topic` and places the payload on the clipboard at the head
    /// of `input`, keyed by the unscoped topic name.
    ///
    /// If `input` holds no clipboard yet one is created and queued.
    pub async fn admit(
        &self,
        topic: &EventTopic,
        input: &Queue,
    ) -> Result<Arc<Clipboard>, HarnessError> {
        let payload = self.wait(topic).await?;

        let clipboard = if let Some(clipboard) = input.element() {
            clipboard
        } else {
            let clipboard = Arc::new(Clipboard::new());
            input.add_dataset(clipboard.clone());
            clipboard
        };
        clipboard.put(topic.topic(), payload)?;
        debug!(topic = %topic, clipboard = %clipboard.id(), "Added event payload to clipboard");
        Ok(clipboard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemoryEventSystem, MockEventReceiver};
    use mockall::Sequence;
    use serde_json::json;

    fn gate_over(receiver: Arc<dyn EventReceiver>) -> EventGate {
        EventGate::new(receiver, Duration::from_millis(5), Duration::from_millis(1))
    }

    #[test]
    fn test_topic_scoping() {
        let topic = EventTopic::new("triggerVisit", "imgPipe");
        assert_eq!(topic.topic(), "triggerVisit");
        assert_eq!(topic.scoped(), "triggerVisit_imgPipe");
        assert_eq!(topic.to_string(), "triggerVisit_imgPipe");
    }

    #[tokio::test]
    async fn test_wait_retries_until_message() {
        let mut mock = MockEventReceiver::new();
        let mut seq = Sequence::new();
        mock.expect_receive()
            .withf(|topic, _| topic == "go_pipe")
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(json!({"ccd": 7}))));

        let gate = gate_over(Arc::new(mock));
        let payload = gate.wait(&EventTopic::new("go", "pipe")).await.unwrap();
        assert_eq!(payload, json!({"ccd": 7}));
    }

    #[tokio::test]
    async fn test_wait_propagates_transport_error() {
        let mut mock = MockEventReceiver::new();
        mock.expect_receive().times(1).returning(|_, _| {
            Err(EventError::BrokerUnavailable {
                broker: "localhost".into(),
                reason: "connection refused".into(),
            })
        });

        let gate = gate_over(Arc::new(mock));
        let err = gate.wait(&EventTopic::new("go", "pipe")).await.unwrap_err();
        assert!(matches!(err, EventError::BrokerUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_admit_uses_existing_clipboard() {
        let events = Arc::new(InMemoryEventSystem::new());
        events.create_receiver("localhost", "go_pipe").unwrap();
        events.publish("go_pipe", json!("payload"));

        let queue = Queue::new();
        let existing = Arc::new(Clipboard::new());
        queue.add_dataset(existing.clone());

        let gate = gate_over(events);
        let clipboard = gate
            .admit(&EventTopic::new("go", "pipe"), &queue)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&clipboard, &existing));
        assert_eq!(existing.get("go").unwrap(), Some(json!("payload")));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_admit_materializes_missing_clipboard() {
        let events = Arc::new(InMemoryEventSystem::new());
        events.create_receiver("localhost", "go_pipe").unwrap();
        events.publish("go_pipe", json!(1));

        let queue = Queue::new();
        let gate = gate_over(events);
        gate.admit(&EventTopic::new("go", "pipe"), &queue)
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
        assert!(queue.element().unwrap().contains_key("go"));
    }

    #[tokio::test]
    async fn test_pending_wait_leaves_clipboard_untouched() {
        let events = Arc::new(InMemoryEventSystem::new());
        events.create_receiver("localhost", "go_pipe").unwrap();

        let queue = Queue::new();
        let clipboard = Arc::new(Clipboard::new());
        queue.add_dataset(clipboard.clone());

        let gate = gate_over(events);
        let topic = EventTopic::new("go", "pipe");
        let waited =
            tokio::time::timeout(Duration::from_millis(50), gate.admit(&topic, &queue)).await;

        assert!(waited.is_err());
        assert!(clipboard.is_empty());
        assert_eq!(queue.len(), 1);
    }
}
