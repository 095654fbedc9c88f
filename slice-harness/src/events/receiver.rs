//! Event receiver trait and an in-process implementation.

use crate::errors::EventError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// The slice's view of the event broker.
///
/// The engine only ever receives; publishing belongs to the coordinator or to
/// stages themselves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Registers interest in a (pipeline-scoped) topic on the given broker.
    ///
    /// Called once per bound topic at configuration time.
    fn create_receiver(&self, broker: &str, topic: &str) -> Result<(), EventError>;

    /// Waits up to `timeout` for the next message on `topic`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Transport failures are
    /// returned as errors and are not retried by the caller.
    async fn receive(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, EventError>;
}

/// An in-process broker.
///
/// Messages are buffered per topic; waiting receivers are woken through a
/// [`Notify`] rather than by polling.
#[derive(Debug, Default)]
pub struct InMemoryEventSystem {
    topics: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    arrivals: Notify,
}

impl InMemoryEventSystem {
    /// Creates an empty event system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a payload on a topic, waking any waiting receivers.
    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) {
        let topic = topic.into();
        debug!(topic = %topic, "Publishing event");
        self.topics.lock().entry(topic).or_default().push_back(payload);
        self.arrivals.notify_waiters();
    }

    /// Returns the number of undelivered messages on a topic.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, VecDeque::len)
    }

    /// Returns true if a receiver exists for the topic.
    #[must_use]
    pub fn has_receiver(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }
}

#[async_trait]
impl EventReceiver for InMemoryEventSystem {
    fn create_receiver(&self, broker: &str, topic: &str) -> Result<(), EventError> {
        debug!(broker = %broker, topic = %topic, "Creating receiver");
        self.topics.lock().entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, EventError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut topics = self.topics.lock();
                let queue = topics.get_mut(topic).ok_or_else(|| EventError::NoReceiver {
                    topic: topic.to_string(),
                })?;
                if let Some(payload) = queue.pop_front() {
                    return Ok(Some(payload));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
