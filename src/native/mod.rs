//! Boundary to the native event log service.
//!
//! The service is modelled as an object-safe capability trait so the rest of
//! the engine never touches a concrete calling convention. Two properties of
//! the native ABI are kept visible in the trait:
//!
//! - Rendering and message formatting write into caller buffers and report
//!   [`NativeError::InsufficientBuffer`] with the required size when the
//!   buffer is too small.
//! - Subscriptions carry a plain `fn` pointer and an opaque
//!   [`SinkContextId`]; no closure crosses the boundary.
//!
//! [`memory::MemoryEventLog`] is a complete in-process implementation.

pub mod memory;

use crate::types::{RawHandle, StatusCode};
use std::fmt;
use std::time::Duration;

/// Failure reported by a native call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeError {
    /// The caller buffer is too small. `required` is in buffer elements.
    InsufficientBuffer { required: usize, property_count: u32 },
    Status(StatusCode),
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::InsufficientBuffer { required, .. } => {
                write!(f, "insufficient buffer ({} required)", required)
            }
            NativeError::Status(code) => write!(f, "status {}", code),
        }
    }
}

impl From<StatusCode> for NativeError {
    fn from(code: StatusCode) -> Self {
        NativeError::Status(code)
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Opaque per-subscription context passed back on every notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkContextId(pub u64);

/// Kind of a subscription notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum NotifyAction {
    /// The handle slot carries a status code, not a handle.
    Error = 0,
    /// The handle slot carries a fresh event handle owned by the receiver.
    Deliver = 1,
}

/// The single callback shape the native layer can invoke. The first
/// argument is the service that issued the notification, so a receiver
/// that cannot route it can still release a delivered handle.
pub type NotifyCallback = fn(&dyn EventLogApi, NotifyAction, SinkContextId, RawHandle) -> u32;

/// Where a subscription starts delivering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeStart {
    FutureEvents,
    OldestRecord,
    /// Start at the record after the bookmarked one. Without `strict`, an
    /// evicted bookmark clamps to the oldest retained record; with `strict`
    /// the subscription fails with `NOT_FOUND` instead.
    AfterBookmark { bookmark: RawHandle, strict: bool },
}

/// Which properties a render context extracts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderContextKind {
    System,
    User,
}

/// What a render call produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderFlags {
    /// Typed variant buffer; requires a render context.
    EventValues,
    /// NUL-terminated UTF-16 XML of the whole event.
    EventXml,
    /// NUL-terminated UTF-16 XML of a bookmark.
    Bookmark,
}

/// Which display string a message format call resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatFlags {
    Event,
    Level,
    Task,
    Opcode,
    /// Multi-string: each keyword name is NUL-terminated.
    Keyword,
    Channel,
    Provider,
    Id,
    Xml,
}

/// Pull query direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryDirection {
    #[default]
    Forward,
    Reverse,
}

/// Sizes reported by a successful render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    /// Bytes written.
    pub buffer_used: usize,
    /// Variant slots written (values renders only).
    pub property_count: u32,
}

/// Capability surface of the native event log service.
pub trait EventLogApi: Send + Sync {
    fn open_subscription(
        &self,
        channel: &str,
        query: &str,
        start: SubscribeStart,
        context: SinkContextId,
        callback: NotifyCallback,
    ) -> NativeResult<RawHandle>;

    fn open_query(
        &self,
        channel: &str,
        query: &str,
        direction: QueryDirection,
    ) -> NativeResult<RawHandle>;

    /// Fetch up to `batch_size` event handles. Fails with `NO_MORE_ITEMS`
    /// when the result set is exhausted and `TIMEOUT` when nothing arrived.
    fn pull_next(
        &self,
        result_set: RawHandle,
        batch_size: usize,
        timeout: Duration,
    ) -> NativeResult<Vec<RawHandle>>;

    fn create_render_context(&self, kind: RenderContextKind) -> NativeResult<RawHandle>;

    fn render(
        &self,
        context: Option<RawHandle>,
        fragment: RawHandle,
        flags: RenderFlags,
        buffer: &mut [u8],
    ) -> NativeResult<RenderSize>;

    fn open_publisher_metadata(&self, provider: &str) -> NativeResult<RawHandle>;

    /// Returns the number of UTF-16 units written, terminator included.
    fn format_message(
        &self,
        publisher: RawHandle,
        event: RawHandle,
        flags: FormatFlags,
        buffer: &mut [u16],
    ) -> NativeResult<usize>;

    fn create_bookmark(&self, xml: Option<&str>) -> NativeResult<RawHandle>;

    fn update_bookmark(&self, bookmark: RawHandle, event: RawHandle) -> NativeResult<()>;

    fn cancel(&self, handle: RawHandle) -> NativeResult<()>;

    fn close(&self, handle: RawHandle) -> NativeResult<()>;
}
