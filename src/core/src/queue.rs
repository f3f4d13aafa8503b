//! Queue-driven predictions
//!
//! Consumes image references from a message queue, runs the prediction
//! pipeline for each of them and notifies a callback service with the result.
//!
//! Components:
//! - `types`: message and callback payloads plus the `MessageQueue` and
//!   `Notifier` boundaries.
//! - `poller`: the `QueuePoller` worker loop.

pub mod poller;
pub mod types;

pub use poller::{PollReport, PollSettings, QueuePoller};
pub use types::{CallbackPayload, MessageQueue, Notifier, QueueMessage, ReceivedMessage};
