//! Event transport boundary and event-gated stage admission.
//!
//! A stage bound to a topic does not run until a message for that topic has
//! arrived; its payload is placed on the stage's input clipboard.

mod gate;
mod receiver;

pub use gate::{EventGate, EventTopic};
#[cfg(test)]
pub use receiver::MockEventReceiver;
pub use receiver::{EventReceiver, InMemoryEventSystem};
