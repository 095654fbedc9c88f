//! Ordered hand-off buffer of clipboards between two adjacent stages.

use super::Clipboard;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A FIFO of clipboards.
///
/// Producers append with [`add_dataset`](Self::add_dataset), consumers remove
/// with [`get_next_dataset`](Self::get_next_dataset), and
/// [`element`](Self::element) peeks at the clipboard in flight without
/// removing it.
#[derive(Debug, Default)]
pub struct Queue {
    items: Mutex<VecDeque<Arc<Clipboard>>>,
}

impl Queue {
    /// Creates a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a clipboard to the tail.
    pub fn add_dataset(&self, clipboard: Arc<Clipboard>) {
        self.items.lock().push_back(clipboard);
    }

    /// Removes and returns the clipboard at the head.
    pub fn get_next_dataset(&self) -> Option<Arc<Clipboard>> {
        self.items.lock().pop_front()
    }

    /// Returns the clipboard at the head without removing it.
    #[must_use]
    pub fn element(&self) -> Option<Arc<Clipboard>> {
        self.items.lock().front().cloned()
    }

    /// Returns the number of queued clipboards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes every queued clipboard, closing each one.
    ///
    /// Returns how many were dropped.
    pub fn drain_and_close(&self) -> usize {
        let drained: Vec<_> = self.items.lock().drain(..).collect();
        for clipboard in &drained {
            clipboard.close();
        }
        drained.len()
    }

    /// Removes every clipboard queued after the first `keep`, closing each one.
    ///
    /// Returns how many were dropped.
    pub fn truncate_and_close(&self, keep: usize) -> usize {
        let dropped: Vec<_> = {
            let mut items = self.items.lock();
            let keep = keep.min(items.len());
            items.drain(keep..).collect()
        };
        for clipboard in &dropped {
            clipboard.close();
        }
        dropped.len()
    }
}
