//! # evtail
//!
//! A resumable tailing engine for a native structured event log service.
//!
//! ## Core Concepts
//!
//! - **Native boundary**: [`EventLogApi`] is the capability surface of the
//!   service; [`MemoryEventLog`] implements it in process
//! - **Decoding**: typed variant buffers rendered with two-phase sizing and
//!   decoded with bounds checks on every pointer
//! - **Subscriptions**: native callbacks routed to per-subscription sinks
//!   through an opaque context id
//! - **Bookmarks**: serialized positions that advance only after a record
//!   was fully assembled, so a restart resumes without loss
//!
//! ## Example
//!
//! ```ignore
//! use evtail::{EventLogClient, FileBookmarkStore, StartPosition, SubscriptionConfig,
//!     SubscriptionManager, TailEvent};
//!
//! let client = EventLogClient::new(api);
//! let manager = SubscriptionManager::new(client)?;
//! let store = FileBookmarkStore::open("./bookmarks.json")?;
//!
//! let start = store
//!     .load("Application")
//!     .map_or(StartPosition::FutureEvents, StartPosition::AfterBookmark);
//! let tail = manager.subscribe(SubscriptionConfig::channel("Application").with_start(start))?;
//!
//! while let Ok(event) = tail.recv() {
//!     if let TailEvent::Record(record) = event {
//!         println!("{} {}", record.event_id, record.msg);
//!         if let Some(bookmark) = &record.bookmark {
//!             store.save("Application", bookmark)?;
//!         }
//!     }
//! }
//! ```

pub mod bookmark;
pub mod client;
pub mod error;
pub mod native;
pub mod query;
pub mod record;
pub mod subscriptions;
pub mod types;
pub mod variant;

// Re-exports
pub use bookmark::{Bookmark, BookmarkTracker, FileBookmarkStore};
pub use client::{EventLogClient, HandleKind, OwnedHandle};
pub use error::{Result, TailError};
pub use native::memory::{HandleCensus, MemoryEventLog, PublisherMetadata, SyntheticEvent};
pub use native::{
    EventLogApi, FormatFlags, NativeError, NativeResult, NotifyAction, QueryDirection,
    RenderContextKind, RenderFlags, SinkContextId, SubscribeStart,
};
pub use query::EventQuery;
pub use record::{EventRecord, EventRecordAssembler, MessageTexts, PublisherCache};
pub use subscriptions::{
    DropReason, EngineConfig, EventSink, ResumeOutcome, StartPosition, SubscriptionConfig,
    SubscriptionId, SubscriptionManager, Tail, TailEvent,
};
pub use types::*;
pub use variant::{RenderContext, Variant, VariantArray, VariantBufferBuilder, VariantDecoder, VariantType};
