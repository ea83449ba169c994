//! # courier-queue
//!
//! Per-channel priority message queue backed by store lists.
//!
//! Each channel has four lists (`urgent`, `high`, `normal`, `low`). A channel
//! worker drains up to `batch_size` messages from each list per tick, always
//! starting again at `urgent`. Failed messages are re-enqueued after an
//! exponential delay until `max_retries` is reached, then dead-lettered.
//!
//! Without a store, or with the `queue.enabled` capability off, enqueue hands
//! the message straight to the channel's local handler once.

pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod queue;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use handler::{DynHandler, FnHandler, HandlerError, MessageHandler, handler_fn};
pub use message::{DeadLetter, Message, NewMessage, Priority, QueueStats};
pub use queue::MessageQueue;
