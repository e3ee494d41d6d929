//! Live subscriptions to event log channels.
//!
//! The native layer delivers notifications on its own threads through a
//! single function pointer. This module maps those notifications back to
//! per-subscription sinks:
//! - [`SubscriptionManager::subscribe`] installs an assembling sink and
//!   returns a [`Tail`] of [`TailEvent`]s
//! - [`SubscriptionManager::subscribe_sink`] routes raw event handles to a
//!   caller-supplied [`EventSink`]
//!
//! Subscriptions support:
//! - Starting at future records, the oldest record, or after a bookmark
//! - Resume clamping when the bookmarked record was evicted
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(client)?;
//!
//! let config = SubscriptionConfig::channel("Application")
//!     .with_start(StartPosition::AfterBookmark(saved));
//! let tail = manager.subscribe(config)?;
//!
//! loop {
//!     match tail.recv() {
//!         Ok(TailEvent::Record(record)) => {
//!             if let Some(bookmark) = &record.bookmark {
//!                 store.save("Application", bookmark)?;
//!             }
//!         }
//!         Ok(TailEvent::Dropped { .. }) => break,
//!         Ok(_) => {}
//!         Err(_) => break,
//!     }
//! }
//! ```

mod bridge;
mod manager;
mod sink;
mod types;

pub use bridge::EventSink;
pub use manager::SubscriptionManager;
pub use types::{
    DropReason, EngineConfig, ResumeOutcome, StartPosition, SubscriptionConfig, SubscriptionId,
    Tail, TailEvent,
};
