//! The per-visit data carrier passed between stages.

use crate::errors::ClipboardError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Key whose presence on a stage's output clipboard requests slice shutdown.
pub const NO_MORE_DATASETS: &str = "noMoreDatasets";

/// Keys written onto a failing stage's input clipboard before it is handed to
/// the failure stage.
pub mod failure_keys {
    /// Name of the stage that failed.
    pub const FAILED_IN_STAGE: &str = "failedInStage";
    /// 1-based ordinal of the stage that failed.
    pub const FAILED_IN_STAGE_N: &str = "failedInStageN";
    /// Failure category.
    pub const FAILURE_TYPE: &str = "failureType";
    /// Error message.
    pub const FAILURE_MESSAGE: &str = "failureMessage";
    /// Error chain and backtrace, if captured.
    pub const FAILURE_TRACEBACK: &str = "failureTraceback";

    /// All five annotation keys.
    pub const ALL: [&str; 5] = [
        FAILED_IN_STAGE,
        FAILED_IN_STAGE_N,
        FAILURE_TYPE,
        FAILURE_MESSAGE,
        FAILURE_TRACEBACK,
    ];
}

/// A named-slot container for data artifacts.
///
/// Clipboards are shared as `Arc<Clipboard>` between queues and stages, so
/// writes go through interior mutability. Once [`close`](Self::close) has been
/// called every read and write fails with [`ClipboardError::Closed`].
#[derive(Debug)]
pub struct Clipboard {
    id: Uuid,
    data: RwLock<HashMap<String, serde_json::Value>>,
    closed: AtomicBool,
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard {
    /// Creates a new empty clipboard with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            data: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a clipboard pre-populated with data.
    #[must_use]
    pub fn from_data(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: RwLock::new(data),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the clipboard's identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_open(&self) -> Result<(), ClipboardError> {
        if self.is_closed() {
            return Err(ClipboardError::Closed {
                id: self.id.to_string(),
            });
        }
        Ok(())
    }

    /// Gets a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ClipboardError> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), ClipboardError> {
        self.ensure_open()?;
        self.data.write().insert(key.into(), value);
        Ok(())
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&self, key: &str) -> Result<Option<serde_json::Value>, ClipboardError> {
        self.ensure_open()?;
        Ok(self.data.write().remove(key))
    }

    /// Returns true if `key` is present. A closed clipboard contains nothing.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        !self.is_closed() && self.data.read().contains_key(key)
    }

    /// Returns all keys.
    pub fn keys(&self) -> Result<Vec<String>, ClipboardError> {
        self.ensure_open()?;
        Ok(self.data.read().keys().cloned().collect())
    }

    /// Returns a copy of all entries.
    pub fn to_dict(&self) -> Result<HashMap<String, serde_json::Value>, ClipboardError> {
        self.ensure_open()?;
        Ok(self.data.read().clone())
    }

    /// Returns the number of entries, or zero once closed.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.data.read().len()
    }

    /// Returns true if the clipboard has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the clipboard and releases its contents. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.data.write().clear();
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
