//! # cc_queue
//!
//! Bounded priority mailbox drained by a fixed pool of worker tasks.
//!
//! Items are served by priority (`High` first) and FIFO within a priority.
//! Every processed item reports back through its optional callback with
//! either the handler's value or a [`HandlerError`].

pub mod config;
pub mod error;
pub mod item;
pub mod priority;
pub mod queue;

pub use config::QueueConfig;
pub use error::HandlerError;
pub use error::QueueError;
pub use error::Result;
pub use item::Callback;
pub use item::QueueItem;
pub use item::callback;
pub use priority::Priority;
pub use queue::PriorityRequestQueue;
pub use queue::QueueStats;
